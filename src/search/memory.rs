//! In-memory [`LogSource`], used by tests and tooling

use super::engine::LogSource;
use super::filters::LogPredicate;
use super::page::LogScan;
use crate::error::AppError;
use crate::models::{MonitoredRequest, RequestLog};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryLogSource {
    requests: RwLock<Vec<MonitoredRequest>>,
    logs: RwLock<Vec<RequestLog>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_request(&self, request: MonitoredRequest) {
        self.requests.write().await.push(request);
    }

    pub async fn add_log(&self, log: RequestLog) {
        self.logs.write().await.push(log);
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn requests_owned_by(&self, user_id: &str) -> Result<Vec<MonitoredRequest>, AppError> {
        Ok(self
            .requests
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn logs_for_requests(
        &self,
        request_ids: &[String],
        scan: &LogScan,
    ) -> Result<Vec<RequestLog>, AppError> {
        let predicate = LogPredicate::build(&scan.filters);
        let mut logs: Vec<RequestLog> = self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| request_ids.contains(&l.request_id) && predicate.matches_log(l))
            .filter(|l| scan.after.as_ref().map_or(true, |c| c.admits(l)))
            .cloned()
            .collect();

        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        logs.truncate(scan.limit);
        Ok(logs)
    }
}
