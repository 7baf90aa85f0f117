//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use storefront_billing::{BillingError, ErrorKind};

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Billing(BillingError::UserNotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string())
            }
            ApiError::Billing(err) => match err.kind() {
                ErrorKind::InvalidInput => {
                    (StatusCode::BAD_REQUEST, "INVALID_INPUT", err.to_string())
                }
                ErrorKind::SignatureInvalid => (
                    StatusCode::BAD_REQUEST,
                    "SIGNATURE_INVALID",
                    "Invalid webhook signature".to_string(),
                ),
                // Acknowledged so the provider stops redelivering
                ErrorKind::Unattributable => (StatusCode::OK, "UNATTRIBUTABLE", err.to_string()),
                ErrorKind::ProviderUnavailable => {
                    (StatusCode::BAD_GATEWAY, "PROVIDER_UNAVAILABLE", err.to_string())
                }
                ErrorKind::PersistenceFailure => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_FAILURE",
                    "Database error".to_string(),
                ),
            },
        }
    }

    /// Whether repeating the same request may succeed
    fn retryable(&self) -> bool {
        match self {
            ApiError::Unauthorized => false,
            ApiError::Billing(err) => err.is_retryable(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let retryable = self.retryable();

        if status.is_server_error() {
            tracing::error!(code = code, error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": retryable,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: BillingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_billing_errors_map_onto_statuses() {
        assert_eq!(
            status_of(BillingError::InvalidAmount("0".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(BillingError::WebhookSignatureInvalid("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(BillingError::Unattributable("no user".into())),
            StatusCode::OK
        );
        assert_eq!(
            status_of(BillingError::ProviderTimeout(20)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(BillingError::ConcurrentModification("ledger".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(BillingError::UserNotFound("user_1".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_error_body_flags_retryable_failures() {
        async fn body_of(err: ApiError) -> serde_json::Value {
            let bytes = axum::body::to_bytes(err.into_response().into_body(), usize::MAX)
                .await
                .unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }

        let timeout = body_of(BillingError::ProviderTimeout(20).into()).await;
        assert_eq!(timeout["error"]["code"], "PROVIDER_UNAVAILABLE");
        assert_eq!(timeout["error"]["retryable"], true);

        let invalid = body_of(BillingError::InvalidInput("two defaults".into()).into()).await;
        assert_eq!(invalid["error"]["retryable"], false);

        let unauthorized = body_of(ApiError::Unauthorized).await;
        assert_eq!(unauthorized["error"]["retryable"], false);
    }

    #[test]
    fn test_malformed_signed_payload_is_acknowledged() {
        assert_eq!(
            status_of(BillingError::WebhookPayload("checkout session payload has no id".into())),
            StatusCode::OK
        );
    }

    #[test]
    fn test_persistence_details_are_not_leaked() {
        let (_, code, message) =
            ApiError::from(BillingError::Database("password=hunter2".into())).parts();
        assert_eq!(code, "PERSISTENCE_FAILURE");
        assert_eq!(message, "Database error");
    }
}
