//! Product catalog admin routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use storefront_billing::{
    CreateProductRequest, CreatedProduct, UpdateProductRequest, UpdatedProduct,
};

use crate::{error::ApiResult, state::AppState};

/// Create a product with its prices
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> ApiResult<(StatusCode, Json<CreatedProduct>)> {
    let created = state.billing.catalog.create_product(&request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Update product details and reconcile its prices
pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<Json<UpdatedProduct>> {
    let updated = state
        .billing
        .catalog
        .update_product(&product_id, &request)
        .await?;
    Ok(Json(updated))
}
