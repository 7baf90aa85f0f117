//! Inbound billing webhook

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use storefront_billing::WebhookOutcome;

use crate::{error::ApiResult, state::AppState};

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

/// Handle Stripe webhook events. The body is taken as raw bytes so the
/// signature is checked against exactly what was sent.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WebhookAck>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.billing.webhooks.handle(&body, signature).await?;

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome,
        }),
    ))
}
