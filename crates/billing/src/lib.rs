//! Storefront Billing Engine
//!
//! This crate keeps the storefront's local state in line with the billing
//! provider: product and price reconciliation, signed webhook processing,
//! the per-user transaction ledger, credit settlement and affiliate payouts.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod catalog;
pub mod client;
pub mod credits;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod payouts;
pub mod pg_store;
pub mod prices;
pub mod settings;
pub mod signature;
pub mod store;
pub mod stripe_gateway;
pub mod webhooks;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

pub use catalog::{
    CreateProductRequest, CreatedProduct, ProductCatalog, UpdateProductRequest, UpdatedProduct,
};
pub use client::{StripeClient, StripeConfig};
pub use credits::{settle, Settlement, SettlementMode, TrialCredits};
pub use error::{BillingError, BillingResult, ErrorKind};
pub use events::{BillingEvent, WebhookEvent};
pub use gateway::ProviderGateway;
pub use ledger::{TransactionLedger, UpsertOutcome};
pub use payouts::{
    PayoutBatchRequest, PayoutBatchResult, PayoutItemResult, PayoutItemStatus, PayoutProcessor,
    DEFAULT_PAYOUT_CONCURRENCY, MAX_PAYOUT_CONCURRENCY,
};
pub use pg_store::PgLedgerStore;
pub use prices::{
    DesiredPrice, PreparedReconcile, PriceReconciler, ReconcileOutcome, ReconcileRequest,
};
pub use settings::{SettingsCache, DEFAULT_SETTINGS_TTL};
pub use store::{LedgerStore, SettingsSource, SiteSettings};
pub use stripe_gateway::StripeGateway;
pub use webhooks::{WebhookConfig, WebhookOutcome, WebhookProcessor};

/// Tunables for [`BillingService`]
#[derive(Debug, Clone)]
pub struct BillingOptions {
    pub webhook: WebhookConfig,
    pub payout_concurrency: usize,
    pub settings_ttl: Duration,
}

impl Default for BillingOptions {
    fn default() -> Self {
        Self {
            webhook: WebhookConfig::default(),
            payout_concurrency: DEFAULT_PAYOUT_CONCURRENCY,
            settings_ttl: DEFAULT_SETTINGS_TTL,
        }
    }
}

/// Main billing service that coordinates all billing operations
pub struct BillingService {
    pub catalog: ProductCatalog,
    pub webhooks: WebhookProcessor,
    pub payouts: PayoutProcessor,
    pub trial_credits: TrialCredits,
    settings: Arc<SettingsCache>,
}

impl BillingService {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        store: Arc<dyn LedgerStore>,
        settings_source: Arc<dyn SettingsSource>,
        options: BillingOptions,
    ) -> Self {
        let settings = Arc::new(SettingsCache::with_ttl(
            settings_source,
            options.settings_ttl,
        ));

        Self {
            catalog: ProductCatalog::new(gateway.clone()),
            webhooks: WebhookProcessor::new(
                gateway.clone(),
                store.clone(),
                settings.clone(),
                options.webhook,
            ),
            payouts: PayoutProcessor::with_concurrency(
                gateway,
                store.clone(),
                options.payout_concurrency,
            ),
            trial_credits: TrialCredits::new(store, settings.clone()),
            settings,
        }
    }

    /// Stripe gateway over a Postgres ledger store
    pub fn with_postgres(stripe: StripeClient, pool: PgPool, mut options: BillingOptions) -> Self {
        if options.webhook.default_secret.is_none() {
            options.webhook.default_secret = stripe.config().webhook_secret.clone();
        }
        let store = Arc::new(PgLedgerStore::new(pool));
        Self::new(
            Arc::new(StripeGateway::new(stripe)),
            store.clone(),
            store,
            options,
        )
    }

    /// Shared settings cache; call `invalidate` when the settings row changes
    pub fn settings(&self) -> &Arc<SettingsCache> {
        &self.settings
    }
}
