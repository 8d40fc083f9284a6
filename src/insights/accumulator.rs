//! Per-endpoint running statistics between seals

use super::headers::HeaderFrequencyTracker;
use super::recent::RecentOutputsBuffer;
use crate::config::AggregationConfig;
use crate::models::{HeaderCount, Insight, RecentOutput, RequestLog, SealedWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Payload sizes are summed in millionths of a KB so the mean does not
/// depend on arrival order.
const PAYLOAD_UNITS_PER_KB: f64 = 1_000_000.0;

/// Sizing knobs shared by every accumulator in a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorSettings {
    pub top_k_headers: usize,
    pub max_tracked_headers: usize,
    pub recent_outputs_capacity: usize,
}

impl Default for AccumulatorSettings {
    fn default() -> Self {
        Self::from(&AggregationConfig::default())
    }
}

impl From<&AggregationConfig> for AccumulatorSettings {
    fn from(cfg: &AggregationConfig) -> Self {
        Self {
            top_k_headers: cfg.top_k_headers,
            max_tracked_headers: cfg.max_tracked_headers,
            recent_outputs_capacity: cfg.recent_outputs_capacity,
        }
    }
}

/// Read-only view of a window: derived statistics without the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightDraft {
    pub request_id: String,
    pub count: u64,
    pub error_count: u64,
    pub avg_response_time: u64,
    pub error_rate: f64,
    pub slowest_response: u64,
    #[serde(rename = "avgPayloadSizeKB")]
    pub avg_payload_size_kb: f64,
    pub status_code_distribution: BTreeMap<String, u64>,
    pub most_common_headers: Option<Vec<HeaderCount>>,
    pub recent_outputs: Option<Vec<RecentOutput>>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub log_ids: Vec<String>,
}

impl InsightDraft {
    /// Turn the draft into an immutable insight with a fresh id
    pub fn into_window(self, score: u8, now: DateTime<Utc>) -> SealedWindow {
        let insight = Insight {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: self.request_id,
            avg_response_time: self.avg_response_time,
            error_rate: self.error_rate,
            slowest_response: self.slowest_response,
            avg_payload_size_kb: self.avg_payload_size_kb,
            status_code_distribution: self.status_code_distribution,
            most_common_headers: self.most_common_headers,
            recent_outputs: self.recent_outputs,
            score,
            created_at: now,
            updated_at: now,
        };

        SealedWindow {
            insight,
            log_ids: self.log_ids,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Accumulator {
    request_id: String,
    count: u64,
    error_count: u64,
    total_response_ms: u128,
    total_payload_units: u128,
    slowest_ms: u64,
    status_counts: BTreeMap<u16, u64>,
    headers: HeaderFrequencyTracker,
    recent: RecentOutputsBuffer,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
    log_ids: Vec<String>,
    seen_ids: HashSet<String>,
}

impl Accumulator {
    pub fn new(request_id: impl Into<String>, settings: AccumulatorSettings) -> Self {
        Self {
            request_id: request_id.into(),
            count: 0,
            error_count: 0,
            total_response_ms: 0,
            total_payload_units: 0,
            slowest_ms: 0,
            status_counts: BTreeMap::new(),
            headers: HeaderFrequencyTracker::new(
                settings.top_k_headers,
                settings.max_tracked_headers,
            ),
            recent: RecentOutputsBuffer::new(settings.recent_outputs_capacity),
            window_start: None,
            window_end: None,
            log_ids: Vec::new(),
            seen_ids: HashSet::new(),
        }
    }

    /// Absorb one validated log. Callers check [`Accumulator::contains`]
    /// first; a repeated id would be counted twice.
    pub fn add(&mut self, log: &RequestLog) {
        self.count += 1;
        if log.is_error {
            self.error_count += 1;
        }

        // float-to-int casts saturate, so the sums must too
        self.total_response_ms = self
            .total_response_ms
            .saturating_add(u128::from(log.response_time_ms));
        self.total_payload_units = self
            .total_payload_units
            .saturating_add((log.response_size_kb * PAYLOAD_UNITS_PER_KB).round() as u128);
        self.slowest_ms = self.slowest_ms.max(log.response_time_ms);

        *self.status_counts.entry(log.status).or_insert(0) += 1;

        if let Some(headers) = &log.headers {
            self.headers.record_json(headers);
        }

        self.recent.push(RecentOutput {
            status: log.status,
            time: log.response_time_ms,
            size: log.response_size_kb,
            timestamp: log.created_at,
        });

        self.window_start = Some(match self.window_start {
            Some(start) => start.min(log.created_at),
            None => log.created_at,
        });
        self.window_end = Some(match self.window_end {
            Some(end) => end.max(log.created_at),
            None => log.created_at,
        });

        self.seen_ids.insert(log.id.clone());
        self.log_ids.push(log.id.clone());
    }

    /// Whether a log with this id is already in the current window
    pub fn contains(&self, log_id: &str) -> bool {
        self.seen_ids.contains(log_id)
    }

    /// Snapshot of the current window without resetting it
    pub fn draft(&self) -> InsightDraft {
        self.build_draft(self.log_ids.clone())
    }

    /// Capture the window and reset to empty.
    ///
    /// Callers hold the key's exclusive lock so no `add` can land between
    /// the capture and the reset.
    pub fn seal_and_reset(&mut self) -> InsightDraft {
        let log_ids = std::mem::take(&mut self.log_ids);
        let draft = self.build_draft(log_ids);
        self.reset();
        draft
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    fn reset(&mut self) {
        self.count = 0;
        self.error_count = 0;
        self.total_response_ms = 0;
        self.total_payload_units = 0;
        self.slowest_ms = 0;
        self.status_counts.clear();
        self.headers.clear();
        self.recent.clear();
        self.window_start = None;
        self.window_end = None;
        self.log_ids.clear();
        self.seen_ids.clear();
    }

    fn build_draft(&self, log_ids: Vec<String>) -> InsightDraft {
        let (avg_response_time, error_rate, avg_payload_size_kb) = if self.count == 0 {
            (0, 0.0, 0.0)
        } else {
            let count = u128::from(self.count);
            // round half up
            let avg_ms = self.total_response_ms.saturating_add(count / 2) / count;
            (
                u64::try_from(avg_ms).unwrap_or(u64::MAX),
                self.error_count as f64 / self.count as f64,
                self.total_payload_units as f64 / PAYLOAD_UNITS_PER_KB / self.count as f64,
            )
        };

        let most_common_headers = Some(self.headers.top_default()).filter(|h| !h.is_empty());
        let recent_outputs = Some(self.recent.snapshot()).filter(|r| !r.is_empty());

        InsightDraft {
            request_id: self.request_id.clone(),
            count: self.count,
            error_count: self.error_count,
            avg_response_time,
            error_rate,
            slowest_response: self.slowest_ms,
            avg_payload_size_kb,
            status_code_distribution: self
                .status_counts
                .iter()
                .map(|(status, count)| (status.to_string(), *count))
                .collect(),
            most_common_headers,
            recent_outputs,
            window_start: self.window_start,
            window_end: self.window_end,
            log_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn log(id: &str, status: u16, time: u64, size: f64, offset_secs: i64) -> RequestLog {
        RequestLog {
            id: id.to_string(),
            request_id: "req-1".to_string(),
            insight_id: None,
            status,
            response_time_ms: time,
            response_size_kb: size,
            is_error: status >= 400,
            response_body: None,
            headers: Some(json!({"content-type": "application/json"})),
            ip_address: None,
            user_agent: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_draft_matches_reference_window() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        let statuses = [200, 200, 201, 404, 500];
        let times = [100, 120, 90, 80, 300];
        for (i, (status, time)) in statuses.iter().zip(times.iter()).enumerate() {
            acc.add(&log(&format!("log-{}", i), *status, *time, 2.0, i as i64));
        }

        let draft = acc.draft();
        assert_eq!(draft.count, 5);
        assert_eq!(draft.avg_response_time, 138);
        assert_eq!(draft.slowest_response, 300);
        assert!((draft.error_rate - 0.4).abs() < f64::EPSILON);
        assert!((draft.avg_payload_size_kb - 2.0).abs() < 1e-9);
        assert_eq!(draft.status_code_distribution.get("200"), Some(&2));
        assert_eq!(draft.status_code_distribution.get("201"), Some(&1));
        assert_eq!(draft.status_code_distribution.get("404"), Some(&1));
        assert_eq!(draft.status_code_distribution.get("500"), Some(&1));
        assert_eq!(draft.status_code_distribution.values().sum::<u64>(), draft.count);
        assert_eq!(draft.log_ids.len(), 5);
    }

    #[test]
    fn test_draft_does_not_reset() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("a", 200, 10, 1.0, 0));

        let _ = acc.draft();
        assert_eq!(acc.count(), 1);
    }

    #[test]
    fn test_seal_and_reset_empties_window() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("a", 200, 10, 1.0, 0));
        acc.add(&log("b", 503, 30, 1.0, 5));

        let draft = acc.seal_and_reset();
        assert_eq!(draft.count, 2);
        assert_eq!(draft.log_ids, vec!["a".to_string(), "b".to_string()]);
        assert!(acc.is_empty());

        let empty = acc.draft();
        assert_eq!(empty.count, 0);
        assert!(empty.status_code_distribution.is_empty());
        assert!(empty.most_common_headers.is_none());
        assert!(empty.recent_outputs.is_none());
        assert!(empty.window_start.is_none());
    }

    #[test]
    fn test_average_rounds_half_up() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("a", 200, 1, 0.0, 0));
        acc.add(&log("b", 200, 2, 0.0, 0));

        assert_eq!(acc.draft().avg_response_time, 2);
    }

    #[test]
    fn test_huge_payloads_saturate_instead_of_overflowing() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("a", 200, u64::MAX, 1e33, 0));
        acc.add(&log("b", 200, u64::MAX, 1e33, 1));

        let draft = acc.draft();
        assert_eq!(draft.count, 2);
        assert_eq!(draft.slowest_response, u64::MAX);
        assert!(draft.avg_payload_size_kb.is_finite());
        assert!(draft.avg_payload_size_kb > 0.0);
    }

    #[test]
    fn test_contains_tracks_current_window_only() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("a", 200, 10, 1.0, 0));
        assert!(acc.contains("a"));
        assert!(!acc.contains("b"));

        acc.seal_and_reset();
        assert!(!acc.contains("a"));
    }

    #[test]
    fn test_error_override_is_respected() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        let mut ok_but_flagged = log("a", 200, 10, 1.0, 0);
        ok_but_flagged.is_error = true;
        acc.add(&ok_but_flagged);

        assert!((acc.draft().error_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_bounds_follow_created_at() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("late", 200, 10, 1.0, 60));
        acc.add(&log("early", 200, 10, 1.0, 0));

        let draft = acc.draft();
        assert!(draft.window_start.unwrap() < draft.window_end.unwrap());
        assert_eq!(draft.recent_outputs.unwrap()[0].timestamp, draft.window_start.unwrap());
    }

    #[test]
    fn test_headers_absent_when_not_observed() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        let mut bare = log("a", 200, 10, 1.0, 0);
        bare.headers = None;
        acc.add(&bare);

        let draft = acc.draft();
        assert!(draft.most_common_headers.is_none());
        assert_eq!(draft.recent_outputs.map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_into_window_carries_log_ids() {
        let mut acc = Accumulator::new("req-1", AccumulatorSettings::default());
        acc.add(&log("a", 200, 10, 1.0, 0));

        let now = Utc::now();
        let window = acc.seal_and_reset().into_window(87, now);
        assert_eq!(window.insight.score, 87);
        assert_eq!(window.insight.request_id, "req-1");
        assert_eq!(window.insight.created_at, now);
        assert_eq!(window.log_ids, vec!["a".to_string()]);
    }
}
