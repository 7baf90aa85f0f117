//! API routes

pub mod billing;
pub mod health;
pub mod payouts;
pub mod products;
pub mod users;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{auth::require_admin, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Provider callbacks authenticate with the payload signature
    let webhook_routes = Router::new().route("/billing/webhook", post(billing::webhook));

    let admin_routes = Router::new()
        .route("/products", post(products::create_product))
        .route("/products/:id", put(products::update_product))
        .route("/payouts", post(payouts::process_payouts))
        .route(
            "/users/:user_id/trial-credits",
            post(users::claim_trial_credits),
        )
        .layer(middleware::from_fn_with_state(
            state.admin_token(),
            require_admin,
        ));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .with_state(state)
}
