//! Persisted shapes shared by ingestion, aggregation, search and storage.
//!
//! Field names serialize in camelCase to stay compatible with the existing
//! dashboard schema.

pub mod insight;
pub mod request_log;

pub use insight::{HeaderCount, Insight, RecentOutput, SealedWindow};
pub use request_log::{MonitoredRequest, NewRequestLog, RequestLog};
