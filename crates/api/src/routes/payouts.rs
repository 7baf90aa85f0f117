use axum::{extract::State, Json};
use storefront_billing::{PayoutBatchRequest, PayoutBatchResult};

use crate::{error::ApiResult, state::AppState};

/// Pay out a batch of pending affiliate commissions
pub async fn process_payouts(
    State(state): State<AppState>,
    Json(request): Json<PayoutBatchRequest>,
) -> ApiResult<Json<PayoutBatchResult>> {
    let result = state
        .billing
        .payouts
        .process_batch(&request.transaction_ids)
        .await?;
    Ok(Json(result))
}
