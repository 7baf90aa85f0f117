//! Billing error types

use serde::Serialize;
use thiserror::Error;

/// Coarse error classification the transport boundary acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or contradictory caller data, rejected before remote calls
    InvalidInput,
    /// Webhook payload failed verification, nothing was processed
    SignatureInvalid,
    /// Remote billing call failed or timed out; safe to retry
    ProviderUnavailable,
    /// Datastore read/write failed; the unit of work was aborted
    PersistenceFailure,
    /// Event lacks the linkage needed to apply it; permanently discarded
    Unattributable,
}

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Stripe request timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("Archived {} price(s) before {} failure(s): {}", archived.len(), failed.len(), describe_failures(failed))]
    PartialArchive {
        archived: Vec<String>,
        failed: Vec<(String, String)>,
    },

    #[error("Webhook signature verification failed: {0}")]
    WebhookSignatureInvalid(String),

    #[error("Malformed webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Event cannot be attributed to a user: {0}")]
    Unattributable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

fn describe_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(id, error)| format!("{} ({})", id, error))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // Operator settings are input too; retrying cannot fix them
            BillingError::InvalidInput(_)
            | BillingError::InvalidAmount(_)
            | BillingError::Config(_) => ErrorKind::InvalidInput,
            BillingError::WebhookSignatureInvalid(_) => ErrorKind::SignatureInvalid,
            BillingError::StripeApi(_)
            | BillingError::ProviderTimeout(_)
            | BillingError::PartialArchive { .. } => ErrorKind::ProviderUnavailable,
            BillingError::Database(_)
            | BillingError::ConcurrentModification(_)
            | BillingError::UserNotFound(_) => ErrorKind::PersistenceFailure,
            // Authentic but unusable payloads are never going to apply
            BillingError::Unattributable(_) | BillingError::WebhookPayload(_) => {
                ErrorKind::Unattributable
            }
        }
    }

    /// Whether the provider should redeliver / the caller should retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProviderUnavailable | ErrorKind::PersistenceFailure
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
