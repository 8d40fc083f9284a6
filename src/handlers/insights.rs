//! Per-request insight endpoints

use super::{ensure_owner, ApiResponse, AppState};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::insights::SealTrigger;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Extension;

/// GET /api/requests/:id/insights
pub async fn list_insights(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ensure_owner(&state.repo, &caller, &request_id).await?;
    let insights = state.repo.insights_for_request(&request_id).await?;
    Ok(ApiResponse::ok(insights))
}

/// GET /api/requests/:id/insights/draft
pub async fn draft_insight(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ensure_owner(&state.repo, &caller, &request_id).await?;
    let draft = state.ingester.store().draft(&request_id)?;
    let score = state.ingester.store().calculator().score(&draft);

    Ok(ApiResponse::ok(serde_json::json!({
        "draft": draft,
        "projectedScore": score,
    })))
}

/// POST /api/requests/:id/insights/seal
pub async fn seal_insight(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ensure_owner(&state.repo, &caller, &request_id).await?;
    let window = state.ingester.seal(&request_id, SealTrigger::Manual).await?;

    Ok((StatusCode::CREATED, ApiResponse::ok(window.insight)))
}
