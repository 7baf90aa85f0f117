//! Stripe client configuration

use std::time::Duration;

use stripe::{Client, Currency};

use crate::error::{BillingError, BillingResult};

/// Default bound on every Stripe request
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Process-wide webhook signing secret, used when the tenant has none
    pub webhook_secret: Option<String>,
    /// Currency used for new prices and transfers
    pub currency: Currency,
    /// Upper bound on each remote call
    pub timeout: Duration,
    /// Attempts for read-only calls (list/retrieve); mutations run once
    pub read_attempts: usize,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let currency = std::env::var("STRIPE_CURRENCY").unwrap_or_else(|_| "usd".to_string());
        let timeout_secs = match std::env::var("STRIPE_TIMEOUT_SECONDS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                BillingError::Config(format!("STRIPE_TIMEOUT_SECONDS is not a number: {}", raw))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            currency: parse_currency(&currency)?,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            read_attempts: 3,
        })
    }
}

/// Parse an ISO currency code into Stripe's currency enum
pub fn parse_currency(code: &str) -> BillingResult<Currency> {
    serde_json::from_value(serde_json::Value::String(code.trim().to_lowercase()))
        .map_err(|_| BillingError::Config(format!("Unsupported currency: {}", code)))
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(config.secret_key.clone());
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
