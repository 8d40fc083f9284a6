//! Log ingestion and search endpoints

use super::{ensure_owner, ApiResponse, AppState, PagedResponse};
use crate::auth::CallerIdentity;
use crate::error::{error_type_name, AppError};
use crate::metrics;
use crate::models::{Insight, NewRequestLog, RequestLog};
use crate::search::{SearchContext, SearchParams};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub log: RequestLog,
    /// Set when this log completed a window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<Insight>,
}

/// POST /api/logs
pub async fn ingest_log(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    body: Result<Json<NewRequestLog>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(new_log) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    // empty ids are left to ingest validation
    let request_id = new_log.request_id.trim();
    if !request_id.is_empty() {
        ensure_owner(&state.repo, &caller, request_id).await?;
    }

    let outcome = state.ingester.ingest(new_log).await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(IngestResponse {
            log: outcome.log,
            insight: outcome.sealed.map(|window| window.insight),
        }),
    ))
}

/// GET /api/logs/search
///
/// Besides the filters, accepts `limit` and the `cursor` returned as
/// `nextCursor` by the previous page.
pub async fn search_logs(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;
    let filters = params.parse()?;
    let page = params.page()?;

    let ctx = SearchContext::with_timeout(Duration::from_millis(state.config.search.timeout_ms));
    let started = Instant::now();
    let result = state.search.search(&ctx, &caller.user_id, &filters, &page).await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => error_type_name(e),
    };
    metrics::record_search(outcome, started.elapsed());

    let page = result?;
    Ok(PagedResponse::ok(page.logs, page.next_cursor))
}
