use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed call against a monitored request.
///
/// Immutable once stored, except for the single `insight_id` assignment made
/// when the window containing it is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub id: String,
    pub request_id: String,
    pub insight_id: Option<String>,
    pub status: u16,
    pub response_time_ms: u64,
    #[serde(rename = "responseSizeKB")]
    pub response_size_kb: f64,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Unvalidated log as submitted by a caller.
///
/// Numeric fields are wide and signed so that out-of-range input reaches
/// validation instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewRequestLog {
    pub id: Option<String>,
    pub request_id: String,
    pub status: i64,
    pub response_time_ms: i64,
    #[serde(rename = "responseSizeKB")]
    pub response_size_kb: f64,
    /// Overrides the `status >= 400` derivation when present
    pub is_error: Option<bool>,
    pub response_body: Option<serde_json::Value>,
    pub headers: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A monitored endpoint owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredRequest {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub method: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_log_serializes_schema_names() {
        let log = RequestLog {
            id: "log-1".to_string(),
            request_id: "req-1".to_string(),
            insight_id: None,
            status: 200,
            response_time_ms: 120,
            response_size_kb: 1.5,
            is_error: false,
            response_body: None,
            headers: None,
            ip_address: None,
            user_agent: Some("curl/8.0".to_string()),
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["requestId"], "req-1");
        assert_eq!(value["responseTimeMs"], 120);
        assert_eq!(value["responseSizeKB"], 1.5);
        assert_eq!(value["isError"], false);
        assert_eq!(value["userAgent"], "curl/8.0");
        assert!(value["insightId"].is_null());
        assert!(value.get("headers").is_none());
    }

    #[test]
    fn test_new_request_log_tolerates_missing_fields() {
        let parsed: NewRequestLog =
            serde_json::from_str(r#"{"requestId":"req-1","status":503}"#).unwrap();

        assert_eq!(parsed.request_id, "req-1");
        assert_eq!(parsed.status, 503);
        assert_eq!(parsed.response_time_ms, 0);
        assert!(parsed.is_error.is_none());
        assert!(parsed.created_at.is_none());
    }
}
