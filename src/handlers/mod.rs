//! HTTP handlers
//!
//! Every authenticated handler receives the caller's [`CallerIdentity`] as a
//! request extension and answers `{"success": true, "data": ...}`. Paged
//! lists add `nextCursor` while more results remain.

pub mod health;
pub mod insights;
pub mod logs;
pub mod metrics_handler;

use crate::auth::CallerIdentity;
use crate::config::Config;
use crate::error::AppError;
use crate::insights::LogIngester;
use crate::observability::LogRepository;
use crate::search::SearchQueryEngine;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Shared state for the API routes
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingester: Arc<LogIngester>,
    pub search: SearchQueryEngine,
    pub repo: LogRepository,
}

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Success envelope for one page of a list
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T: Serialize> {
    pub success: bool,
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T: Serialize> PagedResponse<T> {
    pub fn ok(data: Vec<T>, next_cursor: Option<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            next_cursor,
        })
    }
}

/// 404 if the request does not exist, 403 if the caller does not own it
pub(crate) async fn ensure_owner(
    repo: &LogRepository,
    caller: &CallerIdentity,
    request_id: &str,
) -> Result<(), AppError> {
    match repo.request_owner(request_id).await? {
        None => Err(AppError::NotFound(format!("request {}", request_id))),
        Some(owner) if owner == caller.user_id => Ok(()),
        Some(_) => Err(AppError::Forbidden(
            "Request belongs to another user".to_string(),
        )),
    }
}
