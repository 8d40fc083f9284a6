//! Keyset pagination for search results
//!
//! Results are ordered by `(createdAt, id)` descending. A cursor names the
//! last log of a page; the next page holds the logs strictly after it in that
//! order, so concurrent inserts never shift a page.

use super::filters::SearchFilters;
use crate::error::AppError;
use crate::models::RequestLog;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Position in the `(createdAt, id)` descending order.
///
/// Encoded as `<unix millis>:<log id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl SearchCursor {
    pub fn of(log: &RequestLog) -> Self {
        Self {
            created_at: log.created_at,
            id: log.id.clone(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let invalid = || AppError::Validation(format!("cursor is not valid, got '{}'", raw));

        let (millis, id) = raw.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        let created_at = millis
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(invalid)?;

        Ok(Self {
            created_at,
            id: id.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.created_at.timestamp_millis(), self.id)
    }

    /// Whether `log` comes after this cursor in result order
    pub fn admits(&self, log: &RequestLog) -> bool {
        let position = self
            .created_at
            .cmp(&log.created_at)
            .then_with(|| self.id.as_str().cmp(log.id.as_str()));
        position == Ordering::Greater
    }
}

/// Page size and starting point requested by the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    /// Clamped to the engine's `max_results`; `None` means the maximum
    pub limit: Option<usize>,
    pub after: Option<SearchCursor>,
}

/// What a [`LogSource`](super::LogSource) is asked to return: the logs of
/// some requests matching the log-level filters, after the cursor, newest
/// first, at most `limit` of them.
#[derive(Debug, Clone)]
pub struct LogScan {
    pub filters: SearchFilters,
    pub after: Option<SearchCursor>,
    pub limit: usize,
}

impl Default for LogScan {
    fn default() -> Self {
        Self {
            filters: SearchFilters::default(),
            after: None,
            limit: usize::MAX,
        }
    }
}

/// One page of results. `next_cursor` is set when more logs match.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub logs: Vec<RequestLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(id: &str, millis: i64) -> RequestLog {
        RequestLog {
            id: id.to_string(),
            request_id: "req".to_string(),
            insight_id: None,
            status: 200,
            response_time_ms: 10,
            response_size_kb: 0.0,
            is_error: false,
            response_body: None,
            headers: None,
            ip_address: None,
            user_agent: None,
            created_at: DateTime::from_timestamp_millis(millis).unwrap(),
        }
    }

    #[test]
    fn test_cursor_survives_encoding() {
        let cursor = SearchCursor::of(&log("log:with:colons", 1_700_000_000_123));
        assert_eq!(SearchCursor::parse(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn test_malformed_cursor_is_rejected() {
        for raw in ["", "123", "abc:log", "123:", "99999999999999999999:log"] {
            assert!(
                matches!(SearchCursor::parse(raw), Err(AppError::Validation(_))),
                "{}",
                raw
            );
        }
    }

    #[test]
    fn test_cursor_admits_only_later_results() {
        let cursor = SearchCursor::of(&log("b", 2_000));

        assert!(cursor.admits(&log("x", 1_000)));
        assert!(cursor.admits(&log("a", 2_000)));
        assert!(!cursor.admits(&log("b", 2_000)));
        assert!(!cursor.admits(&log("c", 2_000)));
        assert!(!cursor.admits(&log("a", 3_000)));
    }
}
