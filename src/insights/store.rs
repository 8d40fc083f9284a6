//! Keyed registry of accumulators and the seal lifecycle

use super::accumulator::{Accumulator, AccumulatorSettings, InsightDraft};
use super::score::ScoreCalculator;
use crate::config::{Config, SealPolicy};
use crate::error::AppError;
use crate::models::{RequestLog, SealedWindow};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Slot = Arc<Mutex<Accumulator>>;

/// Owns every live accumulator, one per monitored request id.
///
/// Each accumulator sits behind its own mutex. The map only hands out `Arc`
/// clones, so holding one key's lock never blocks a different key, and no
/// I/O happens while a lock is held.
pub struct AggregateStore {
    accumulators: DashMap<String, Slot>,
    settings: AccumulatorSettings,
    calculator: ScoreCalculator,
    /// `Some(n)` when the count policy is active
    auto_seal_threshold: Option<u64>,
}

impl AggregateStore {
    pub fn new(
        settings: AccumulatorSettings,
        calculator: ScoreCalculator,
        auto_seal_threshold: Option<u64>,
    ) -> Self {
        Self {
            accumulators: DashMap::new(),
            settings,
            calculator,
            auto_seal_threshold,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let threshold = match cfg.aggregation.seal_policy {
            SealPolicy::Count => Some(cfg.aggregation.seal_threshold),
            SealPolicy::Interval => None,
        };

        Self::new(
            AccumulatorSettings::from(&cfg.aggregation),
            ScoreCalculator::new(cfg.scoring.clone()),
            threshold,
        )
    }

    /// Add a validated log to its request's window.
    ///
    /// Under the count policy, the add that fills the window seals it inside
    /// the same critical section and returns the sealed window. A log whose
    /// id is already in the open window is rejected and changes nothing.
    pub fn add(&self, log: &RequestLog) -> Result<Option<SealedWindow>, AppError> {
        let slot = self.slot(&log.request_id);
        let mut acc = lock(&slot, &log.request_id)?;
        if acc.contains(&log.id) {
            return Err(AppError::Validation(format!(
                "log id '{}' was already submitted",
                log.id
            )));
        }
        acc.add(log);

        match self.auto_seal_threshold {
            Some(threshold) if acc.count() >= threshold => {
                let draft = acc.seal_and_reset();
                drop(acc);
                tracing::debug!(
                    request_id = %log.request_id,
                    count = draft.count,
                    "Window reached seal threshold"
                );
                Ok(Some(self.finish(draft)))
            }
            _ => Ok(None),
        }
    }

    /// Seal the current window for `request_id`.
    ///
    /// Returns `NoData` when nothing was added since the last seal; the store
    /// is left untouched in that case.
    pub fn seal(&self, request_id: &str) -> Result<SealedWindow, AppError> {
        let slot = self
            .existing_slot(request_id)
            .ok_or_else(|| AppError::NoData(request_id.to_string()))?;

        let mut acc = lock(&slot, request_id)?;
        if acc.is_empty() {
            return Err(AppError::NoData(request_id.to_string()));
        }
        let draft = acc.seal_and_reset();
        drop(acc);

        Ok(self.finish(draft))
    }

    /// Seal every non-empty window. Used by the interval policy.
    pub fn seal_all(&self) -> Vec<SealedWindow> {
        // collect keys first so no map shard is held while sealing
        let keys: Vec<String> = self.accumulators.iter().map(|entry| entry.key().clone()).collect();

        let mut sealed = Vec::new();
        for request_id in keys {
            match self.seal(&request_id) {
                Ok(window) => sealed.push(window),
                Err(AppError::NoData(_)) => {}
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Failed to seal window");
                }
            }
        }
        sealed
    }

    /// Mid-window view. Unknown keys yield an empty draft.
    pub fn draft(&self, request_id: &str) -> Result<InsightDraft, AppError> {
        match self.existing_slot(request_id) {
            Some(slot) => Ok(lock(&slot, request_id)?.draft()),
            None => Ok(Accumulator::new(request_id, self.settings).draft()),
        }
    }

    /// Whether `log_id` is in the open window for `request_id`
    pub fn contains_log(&self, request_id: &str, log_id: &str) -> Result<bool, AppError> {
        match self.existing_slot(request_id) {
            Some(slot) => Ok(lock(&slot, request_id)?.contains(log_id)),
            None => Ok(false),
        }
    }

    /// Logs waiting in the current window for `request_id`
    pub fn pending(&self, request_id: &str) -> Result<u64, AppError> {
        match self.existing_slot(request_id) {
            Some(slot) => Ok(lock(&slot, request_id)?.count()),
            None => Ok(0),
        }
    }

    /// Number of tracked request ids
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    pub fn calculator(&self) -> &ScoreCalculator {
        &self.calculator
    }

    fn finish(&self, draft: InsightDraft) -> SealedWindow {
        let score = self.calculator.score(&draft);
        draft.into_window(score, Utc::now())
    }

    fn existing_slot(&self, request_id: &str) -> Option<Slot> {
        self.accumulators.get(request_id).map(|entry| entry.value().clone())
    }

    fn slot(&self, request_id: &str) -> Slot {
        if let Some(slot) = self.existing_slot(request_id) {
            return slot;
        }

        self.accumulators
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Accumulator::new(request_id, self.settings))))
            .value()
            .clone()
    }
}

fn lock<'a>(slot: &'a Slot, request_id: &str) -> Result<MutexGuard<'a, Accumulator>, AppError> {
    slot.lock().map_err(|_| {
        AppError::Internal(format!("Accumulator lock poisoned for request {}", request_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn log(request_id: &str, id: &str, status: u16, time: u64) -> RequestLog {
        RequestLog {
            id: id.to_string(),
            request_id: request_id.to_string(),
            insight_id: None,
            status,
            response_time_ms: time,
            response_size_kb: 1.0,
            is_error: status >= 400,
            response_body: None,
            headers: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    fn manual_store() -> AggregateStore {
        AggregateStore::new(AccumulatorSettings::default(), ScoreCalculator::default(), None)
    }

    #[test]
    fn test_seal_produces_reference_insight() {
        let store = manual_store();
        let statuses = [200, 200, 201, 404, 500];
        let times = [100, 120, 90, 80, 300];
        for (i, (status, time)) in statuses.iter().zip(times.iter()).enumerate() {
            assert!(store.add(&log("req-1", &format!("l{}", i), *status, *time)).unwrap().is_none());
        }

        let window = store.seal("req-1").unwrap();
        let insight = &window.insight;
        assert_eq!(insight.avg_response_time, 138);
        assert_eq!(insight.slowest_response, 300);
        assert!((insight.error_rate - 0.4).abs() < f64::EPSILON);
        assert_eq!(insight.score, 60);
        assert_eq!(insight.status_code_distribution.values().sum::<u64>(), 5);
        assert_eq!(window.log_ids.len(), 5);
    }

    #[test]
    fn test_seal_empty_returns_no_data() {
        let store = manual_store();
        assert!(matches!(store.seal("missing"), Err(AppError::NoData(_))));

        store.add(&log("req-1", "a", 200, 10)).unwrap();
        store.seal("req-1").unwrap();
        assert!(matches!(store.seal("req-1"), Err(AppError::NoData(_))));

        // the store keeps working after a NoData
        store.add(&log("req-1", "b", 200, 10)).unwrap();
        assert_eq!(store.pending("req-1").unwrap(), 1);
        assert_eq!(store.seal("req-1").unwrap().log_ids, vec!["b".to_string()]);
    }

    #[test]
    fn test_count_policy_seals_on_threshold() {
        let store =
            AggregateStore::new(AccumulatorSettings::default(), ScoreCalculator::default(), Some(3));

        assert!(store.add(&log("req-1", "a", 200, 10)).unwrap().is_none());
        assert!(store.add(&log("req-1", "b", 200, 10)).unwrap().is_none());
        let sealed = store.add(&log("req-1", "c", 200, 10)).unwrap().unwrap();

        assert_eq!(sealed.log_ids.len(), 3);
        assert_eq!(store.pending("req-1").unwrap(), 0);
    }

    #[test]
    fn test_duplicate_id_is_rejected_before_aggregation() {
        let store = manual_store();
        store.add(&log("req-1", "a", 200, 10)).unwrap();

        let result = store.add(&log("req-1", "a", 500, 900));
        assert!(matches!(result, Err(AppError::Validation(_))));

        let draft = store.draft("req-1").unwrap();
        assert_eq!(draft.count, 1);
        assert_eq!(draft.error_count, 0);
        assert_eq!(draft.slowest_response, 10);

        // the id is free again once its window is sealed
        store.seal("req-1").unwrap();
        assert!(store.add(&log("req-1", "a", 200, 10)).is_ok());
    }

    #[test]
    fn test_keys_are_isolated() {
        let store = manual_store();
        store.add(&log("req-1", "a", 200, 10)).unwrap();
        store.add(&log("req-2", "b", 500, 10)).unwrap();

        let window = store.seal("req-1").unwrap();
        assert_eq!(window.insight.request_id, "req-1");
        assert_eq!(store.pending("req-2").unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_seal_all_skips_empty_windows() {
        let store = manual_store();
        store.add(&log("req-1", "a", 200, 10)).unwrap();
        store.add(&log("req-2", "b", 200, 10)).unwrap();
        store.seal("req-2").unwrap();

        let sealed = store.seal_all();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].insight.request_id, "req-1");
    }

    #[test]
    fn test_draft_for_unknown_key_is_empty() {
        let store = manual_store();
        let draft = store.draft("nobody").unwrap();
        assert_eq!(draft.count, 0);
        assert!(store.is_empty());
    }
}
