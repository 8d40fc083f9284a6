//! Tenant-scoped log search with cooperative cancellation

use super::filters::{LogPredicate, SearchFilters};
use super::page::{LogScan, PageRequest, SearchCursor, SearchPage};
use crate::error::AppError;
use crate::models::{MonitoredRequest, RequestLog};
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Read access to persisted requests and logs
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn requests_owned_by(&self, user_id: &str) -> Result<Vec<MonitoredRequest>, AppError>;

    /// Logs of `request_ids` as described by `scan`, newest first. The engine
    /// re-checks ownership and every filter on what comes back.
    async fn logs_for_requests(
        &self,
        request_ids: &[String],
        scan: &LogScan,
    ) -> Result<Vec<RequestLog>, AppError>;
}

/// Deadline and cancellation flag for one search
#[derive(Debug, Clone)]
pub struct SearchContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl SearchContext {
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation; every clone of this context observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn check(&self) -> Result<(), AppError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(AppError::Cancelled("search was cancelled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(AppError::Cancelled("search timed out".to_string()));
            }
        }
        Ok(())
    }

    /// Await `fut`, giving up at the deadline
    async fn run<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.check()?;
        let result = match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| AppError::Cancelled("search timed out".to_string()))?,
            None => fut.await,
        };
        self.check()?;
        result
    }
}

/// Stateless predicate evaluation and ordering over a [`LogSource`]
#[derive(Clone)]
pub struct SearchQueryEngine {
    source: Arc<dyn LogSource>,
    max_results: usize,
    check_interval: usize,
}

impl SearchQueryEngine {
    pub fn new(source: Arc<dyn LogSource>, max_results: usize, check_interval: usize) -> Self {
        Self {
            source,
            max_results: max_results.max(1),
            check_interval: check_interval.max(1),
        }
    }

    /// One page of `owner`'s logs matching every filter, newest first.
    ///
    /// Only requests owned by `owner` are considered, whatever the source
    /// returns. A page holds at most `max_results` logs; `next_cursor` is set
    /// whenever more logs match. A log may not carry its insight id yet if
    /// its window is still open or being persisted.
    pub async fn search(
        &self,
        ctx: &SearchContext,
        owner: &str,
        filters: &SearchFilters,
        page: &PageRequest,
    ) -> Result<SearchPage, AppError> {
        let predicate = LogPredicate::build(filters);
        let page_size = page.limit.unwrap_or(self.max_results).min(self.max_results);

        let requests = ctx.run(self.source.requests_owned_by(owner)).await?;
        let request_ids: Vec<String> = requests
            .iter()
            .filter(|r| r.user_id == owner && predicate.matches_request(r))
            .map(|r| r.id.clone())
            .collect();
        if request_ids.is_empty() {
            return Ok(SearchPage::default());
        }

        // one extra row tells whether another page exists
        let scan = LogScan {
            filters: filters.clone(),
            after: page.after.clone(),
            limit: page_size + 1,
        };
        let mut fetched = ctx.run(self.source.logs_for_requests(&request_ids, &scan)).await?;
        fetched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let next_cursor = if fetched.len() > page_size {
            fetched.truncate(page_size);
            fetched.last().map(|log| SearchCursor::of(log).encode())
        } else {
            None
        };

        let owned: HashSet<&str> = request_ids.iter().map(String::as_str).collect();
        let mut logs = Vec::with_capacity(fetched.len());
        for (scanned, log) in fetched.into_iter().enumerate() {
            if scanned % self.check_interval == 0 {
                ctx.check()?;
            }
            let after_cursor = page.after.as_ref().map_or(true, |c| c.admits(&log));
            if after_cursor && owned.contains(log.request_id.as_str()) && predicate.matches_log(&log) {
                logs.push(log);
            }
        }

        tracing::debug!(
            owner = %owner,
            filtered = !filters.is_empty(),
            requests = request_ids.len(),
            matched = logs.len(),
            more = next_cursor.is_some(),
            "Search completed"
        );

        Ok(SearchPage { logs, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filters::SearchParams;
    use crate::search::memory::MemoryLogSource;
    use chrono::{TimeZone, Utc};

    fn request(id: &str, user: &str, method: &str) -> MonitoredRequest {
        MonitoredRequest {
            id: id.to_string(),
            user_id: user.to_string(),
            name: id.to_string(),
            method: method.to_string(),
            url: format!("https://api.example.com/{}", id),
            created_at: Utc::now(),
        }
    }

    fn log(id: &str, request_id: &str, status: u16, minute: u32) -> RequestLog {
        RequestLog {
            id: id.to_string(),
            request_id: request_id.to_string(),
            insight_id: None,
            status,
            response_time_ms: 100,
            response_size_kb: 1.0,
            is_error: status >= 400,
            response_body: None,
            headers: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    async fn fixture() -> Arc<MemoryLogSource> {
        let source = Arc::new(MemoryLogSource::new());
        source.add_request(request("get-users", "alice", "GET")).await;
        source.add_request(request("post-users", "alice", "POST")).await;
        source.add_request(request("bob-api", "bob", "GET")).await;

        source.add_log(log("a1", "get-users", 200, 1)).await;
        source.add_log(log("a2", "get-users", 404, 2)).await;
        source.add_log(log("a3", "post-users", 404, 3)).await;
        source.add_log(log("b1", "bob-api", 404, 4)).await;
        source
    }

    fn engine(source: Arc<MemoryLogSource>) -> SearchQueryEngine {
        SearchQueryEngine::new(source, 1000, 2)
    }

    fn ids(logs: &[RequestLog]) -> Vec<&str> {
        logs.iter().map(|l| l.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_no_filters_returns_own_logs_newest_first() {
        let engine = engine(fixture().await);
        let page = engine
            .search(&SearchContext::unbounded(), "alice", &SearchFilters::default(), &PageRequest::default())
            .await
            .unwrap();

        assert_eq!(ids(&page.logs), vec!["a3", "a2", "a1"]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_method_and_status_filter() {
        let engine = engine(fixture().await);
        let filters = SearchParams {
            method: Some("get".to_string()),
            status: Some("404".to_string()),
            ..Default::default()
        }
        .parse()
        .unwrap();

        let page = engine
            .search(&SearchContext::unbounded(), "alice", &filters, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&page.logs), vec!["a2"]);
    }

    #[tokio::test]
    async fn test_unknown_owner_sees_nothing() {
        let engine = engine(fixture().await);
        let page = engine
            .search(&SearchContext::unbounded(), "mallory", &SearchFilters::default(), &PageRequest::default())
            .await
            .unwrap();
        assert!(page.logs.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_capped_results_carry_a_cursor_to_the_rest() {
        let engine = SearchQueryEngine::new(fixture().await, 2, 1);
        let ctx = SearchContext::unbounded();
        let filters = SearchFilters::default();

        let first = engine
            .search(&ctx, "alice", &filters, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&first.logs), vec!["a3", "a2"]);
        let cursor = first.next_cursor.expect("more logs match");

        let next = PageRequest {
            limit: None,
            after: Some(SearchCursor::parse(&cursor).unwrap()),
        };
        let second = engine.search(&ctx, "alice", &filters, &next).await.unwrap();
        assert_eq!(ids(&second.logs), vec!["a1"]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_limit_pages_through_every_log_once() {
        let engine = engine(fixture().await);
        let ctx = SearchContext::unbounded();
        let filters = SearchFilters::default();

        let mut seen = Vec::new();
        let mut page = PageRequest {
            limit: Some(1),
            after: None,
        };
        loop {
            let result = engine.search(&ctx, "alice", &filters, &page).await.unwrap();
            assert!(result.logs.len() <= 1);
            seen.extend(result.logs.into_iter().map(|l| l.id));
            match result.next_cursor {
                Some(cursor) => page.after = Some(SearchCursor::parse(&cursor).unwrap()),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a3", "a2", "a1"]);
    }

    #[tokio::test]
    async fn test_limit_cannot_exceed_max_results() {
        let engine = SearchQueryEngine::new(fixture().await, 2, 1);
        let page = PageRequest {
            limit: Some(500),
            after: None,
        };
        let result = engine
            .search(&SearchContext::unbounded(), "alice", &SearchFilters::default(), &page)
            .await
            .unwrap();
        assert_eq!(result.logs.len(), 2);
        assert!(result.next_cursor.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let engine = engine(fixture().await);
        let ctx = SearchContext::unbounded();
        ctx.cancel();

        let result = engine
            .search(&ctx, "alice", &SearchFilters::default(), &PageRequest::default())
            .await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let engine = engine(fixture().await);
        let ctx = SearchContext::with_timeout(Duration::ZERO);

        let result = engine
            .search(&ctx, "alice", &SearchFilters::default(), &PageRequest::default())
            .await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }
}
