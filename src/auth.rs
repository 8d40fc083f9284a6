use crate::{error::AppError, observability::LogRepository};
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Identity attached to each authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    /// Whether the account has been verified; unverified callers are refused
    pub verified: bool,
}

/// Resolves bearer tokens to callers
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when the token is unknown
    async fn identify(&self, token: &str) -> Result<Option<CallerIdentity>, AppError>;
}

/// Looks up `sha256(token)` in the users table
pub struct SqliteIdentityProvider {
    repo: LogRepository,
}

impl SqliteIdentityProvider {
    pub fn new(repo: LogRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityProvider {
    async fn identify(&self, token: &str) -> Result<Option<CallerIdentity>, AppError> {
        let user = self.repo.find_user_by_token_hash(&hash_token(token)).await?;

        Ok(user.map(|user| CallerIdentity {
            user_id: user.id,
            verified: user.is_verified,
        }))
    }
}

/// Hex SHA256 of an API token, as stored in `users.api_key_hash`
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Authentication middleware
///
/// Missing, malformed or unknown token → 401; unverified account → 403.
pub async fn auth_middleware(
    State(provider): State<Arc<dyn IdentityProvider>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = extract_bearer_token(auth_header)?;

    let identity = provider
        .identify(token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;

    if !identity.verified {
        tracing::debug!(user_id = %identity.user_id, "Rejected unverified caller");
        return Err(AppError::Forbidden("Account is not verified".to_string()));
    }

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(auth_header: &str) -> Result<&str, AppError> {
    const BEARER_PREFIX: &str = "Bearer ";

    let token = auth_header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| {
            AppError::Unauthorized("Authorization header must use Bearer scheme".to_string())
        })?
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthorized("Bearer token is empty".to_string()));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::database::test_support::memory_repository;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    #[test]
    fn test_extract_bearer_token_success() {
        let token = extract_bearer_token("Bearer ins-test-key-123").unwrap();
        assert_eq!(token, "ins-test-key-123");
    }

    #[test]
    fn test_extract_bearer_token_missing_prefix() {
        assert!(extract_bearer_token("ins-test-key-123").is_err());
        assert!(extract_bearer_token("Basic dXNlcjpwYXNz").is_err());
    }

    #[test]
    fn test_extract_bearer_token_empty() {
        assert!(extract_bearer_token("Bearer ").is_err());
        assert!(extract_bearer_token("Bearer    ").is_err());
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    async fn app() -> Router {
        let repo = memory_repository().await;
        repo.insert_user("alice", "alice@example.com", &hash_token("alice-key"), true)
            .await
            .unwrap();
        repo.insert_user("bob", "bob@example.com", &hash_token("bob-key"), false)
            .await
            .unwrap();

        let provider: Arc<dyn IdentityProvider> = Arc::new(SqliteIdentityProvider::new(repo));
        Router::new()
            .route(
                "/whoami",
                get(|Extension(id): Extension<CallerIdentity>| async move { id.user_id }),
            )
            .layer(middleware::from_fn_with_state(provider, auth_middleware))
    }

    async fn status_for(header: Option<&str>) -> StatusCode {
        let mut request = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = header {
            request = request.header("Authorization", value);
        }
        app()
            .await
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_middleware_outcomes() {
        assert_eq!(status_for(None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(Some("Token alice-key")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(Some("Bearer wrong")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(Some("Bearer bob-key")).await, StatusCode::FORBIDDEN);
        assert_eq!(status_for(Some("Bearer alice-key")).await, StatusCode::OK);
    }
}
