//! Validation and routing of incoming request logs

use super::store::AggregateStore;
use crate::error::{error_type_name, AppError};
use crate::metrics;
use crate::models::{NewRequestLog, RequestLog, SealedWindow};
use crate::observability::PersistenceWriter;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::sync::Arc;

/// Largest accepted `responseSizeKB` (1 PB)
pub const MAX_RESPONSE_SIZE_KB: f64 = 1e12;

/// What caused a window to be sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTrigger {
    Count,
    Interval,
    Manual,
}

impl SealTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Interval => "interval",
            Self::Manual => "manual",
        }
    }
}

/// Result of a successful ingest
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub log: RequestLog,
    /// Present when this log filled the window under the count policy
    pub sealed: Option<SealedWindow>,
}

/// Entry point for logs. Validates, persists (when a writer is attached) and
/// feeds the aggregate store.
pub struct LogIngester {
    store: Arc<AggregateStore>,
    writer: Option<PersistenceWriter>,
}

impl LogIngester {
    pub fn new(store: Arc<AggregateStore>, writer: Option<PersistenceWriter>) -> Self {
        Self { store, writer }
    }

    pub fn store(&self) -> &Arc<AggregateStore> {
        &self.store
    }

    /// Jobs waiting for the persistence writer, 0 without one
    pub fn writer_backlog(&self) -> usize {
        self.writer.as_ref().map_or(0, PersistenceWriter::backlog)
    }

    pub async fn ingest(&self, new_log: NewRequestLog) -> Result<IngestOutcome, AppError> {
        let caller_id = new_log.id.as_deref().is_some_and(|id| !id.trim().is_empty());

        let accepted = match validate(new_log, Utc::now()) {
            Ok(log) => self.claim(&log, caller_id).await.map(|()| log),
            Err(e) => Err(e),
        };
        let log = match accepted {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected request log");
                metrics::record_rejected(error_type_name(&e));
                return Err(e);
            }
        };

        // The row must be queued before any window can reference it
        if let Some(writer) = &self.writer {
            writer.write_log(log.clone());
        }

        let sealed = self.store.add(&log).inspect_err(|e| {
            tracing::error!(request_id = %log.request_id, error = %e, "Failed to aggregate log");
            metrics::record_rejected(error_type_name(e));
        })?;
        metrics::record_ingested();

        if let Some(window) = &sealed {
            self.publish(window, SealTrigger::Count).await;
        }

        Ok(IngestOutcome { log, sealed })
    }

    /// Seal one request's window and hand it to the writer
    pub async fn seal(&self, request_id: &str, trigger: SealTrigger) -> Result<SealedWindow, AppError> {
        let window = self.store.seal(request_id)?;
        self.publish(&window, trigger).await;
        Ok(window)
    }

    /// Seal every non-empty window; returns how many were sealed
    pub async fn seal_all(&self, trigger: SealTrigger) -> usize {
        let windows = self.store.seal_all();
        for window in &windows {
            self.publish(window, trigger).await;
        }
        windows.len()
    }

    /// Reject a caller-supplied id seen before. Generated ids are unique.
    async fn claim(&self, log: &RequestLog, caller_id: bool) -> Result<(), AppError> {
        if !caller_id {
            return Ok(());
        }
        match &self.writer {
            Some(writer) => writer.claim_log_id(&log.id).await,
            // without persistence only the open window can be checked
            None if self.store.contains_log(&log.request_id, &log.id)? => Err(AppError::Validation(
                format!("log id '{}' was already submitted", log.id),
            )),
            None => Ok(()),
        }
    }

    async fn publish(&self, window: &SealedWindow, trigger: SealTrigger) {
        metrics::record_sealed(trigger.as_str());
        metrics::set_live_accumulators(self.store.len());

        tracing::info!(
            request_id = %window.insight.request_id,
            insight_id = %window.insight.id,
            count = window.log_ids.len(),
            score = window.insight.score,
            trigger = trigger.as_str(),
            "Sealed insight window"
        );

        if let Some(writer) = &self.writer {
            writer.write_window(window.clone());
        }
    }
}

/// Check a submitted log and fill in derived fields.
///
/// `is_error` defaults to `status >= 400`, a missing id gets a fresh UUID and
/// a missing `created_at` becomes `now`. `created_at` is truncated to the
/// millisecond, the precision it is stored with.
pub fn validate(new_log: NewRequestLog, now: DateTime<Utc>) -> Result<RequestLog, AppError> {
    let request_id = new_log.request_id.trim();
    if request_id.is_empty() {
        return Err(AppError::Validation("requestId must not be empty".to_string()));
    }

    if !(100..=599).contains(&new_log.status) {
        return Err(AppError::Validation(format!(
            "status must be between 100 and 599, got {}",
            new_log.status
        )));
    }

    if new_log.response_time_ms < 0 {
        return Err(AppError::Validation(format!(
            "responseTimeMs must be >= 0, got {}",
            new_log.response_time_ms
        )));
    }

    if !(0.0..=MAX_RESPONSE_SIZE_KB).contains(&new_log.response_size_kb) {
        return Err(AppError::Validation(format!(
            "responseSizeKB must be between 0 and {}, got {}",
            MAX_RESPONSE_SIZE_KB, new_log.response_size_kb
        )));
    }

    let created_at = new_log.created_at.unwrap_or(now);
    let created_at = created_at
        .duration_trunc(Duration::milliseconds(1))
        .map_err(|e| AppError::Validation(format!("createdAt is out of range: {}", e)))?;

    let status = new_log.status as u16;
    let id = new_log
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(RequestLog {
        id,
        request_id: request_id.to_string(),
        insight_id: None,
        status,
        response_time_ms: new_log.response_time_ms as u64,
        response_size_kb: new_log.response_size_kb,
        is_error: new_log.is_error.unwrap_or(status >= 400),
        response_body: new_log.response_body,
        headers: new_log.headers,
        ip_address: new_log.ip_address,
        user_agent: new_log.user_agent,
        created_at,
    })
}
