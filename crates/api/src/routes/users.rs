//! User credit routes

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use storefront_shared::UserId;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct TrialCreditsResponse {
    pub credits: i64,
}

/// Grant the one-time trial credits
pub async fn claim_trial_credits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<TrialCreditsResponse>> {
    let credits = state
        .billing
        .trial_credits
        .claim(&UserId::from(user_id))
        .await?;
    Ok(Json(TrialCreditsResponse { credits }))
}
