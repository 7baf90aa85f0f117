//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use storefront_billing::BillingService;

use crate::{auth::AdminToken, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: BillingService) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            billing: Arc::new(billing),
        }
    }

    pub fn admin_token(&self) -> AdminToken {
        AdminToken::new(&self.config.admin_api_token)
    }
}
