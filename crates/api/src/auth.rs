//! Admin bearer token authentication

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;

/// Token admin callers present as `Authorization: Bearer <token>`
#[derive(Clone)]
pub struct AdminToken(Arc<str>);

impl AdminToken {
    pub fn new(token: &str) -> Self {
        Self(Arc::from(token))
    }

    pub fn matches(&self, presented: &str) -> bool {
        constant_time_compare(presented, &self.0)
    }
}

/// Reject requests without the admin bearer token
pub async fn require_admin(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match bearer(request.headers()) {
        Some(presented) if token.matches(presented) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected invalid admin token");
            Err(ApiError::Unauthorized)
        }
        None => Err(ApiError::Unauthorized),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    // Even when lengths differ, do the same amount of work
    if a.len() != b.len() {
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    const TOKEN: &str = "admin-token-0123456789abcdef0123456789";

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                AdminToken::new(TOKEN),
                require_admin,
            ))
    }

    async fn status_with(auth: Option<&str>) -> StatusCode {
        let mut request = HttpRequest::builder().uri("/");
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        app()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        assert_eq!(status_with(Some(&format!("Bearer {}", TOKEN))).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_or_wrong_token_is_rejected() {
        assert_eq!(status_with(None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_with(Some("Bearer nope")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_with(Some(TOKEN)).await, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
