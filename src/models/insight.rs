use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of one sealed aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub request_id: String,
    pub avg_response_time: u64,
    pub error_rate: f64,
    pub slowest_response: u64,
    #[serde(rename = "avgPayloadSizeKB")]
    pub avg_payload_size_kb: f64,
    /// Status code (as string) -> count; counts sum to the window size
    pub status_code_distribution: BTreeMap<String, u64>,
    pub most_common_headers: Option<Vec<HeaderCount>>,
    pub recent_outputs: Option<Vec<RecentOutput>>,
    pub score: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One `mostCommonHeaders` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCount {
    pub name: String,
    pub value: String,
    pub count: u64,
}

/// One `recentOutputs` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentOutput {
    pub status: u16,
    /// Response time in milliseconds
    pub time: u64,
    /// Response size in KB
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

/// A sealed insight plus the ids of the logs it absorbed.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedWindow {
    pub insight: Insight,
    pub log_ids: Vec<String>,
}
