//! Application configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use storefront_billing::{
    BillingOptions, WebhookConfig, DEFAULT_PAYOUT_CONCURRENCY, DEFAULT_SETTINGS_TTL,
    MAX_PAYOUT_CONCURRENCY,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub admin_api_token: String,
    pub log_format: LogFormat,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Webhooks
    pub stripe_webhook_secret: Option<String>,
    pub webhook_tolerance: Duration,
    pub webhook_dedupe_events: bool,

    // Billing
    pub payout_concurrency: usize,
    pub settings_cache_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            admin_api_token: {
                let token = env::var("ADMIN_API_TOKEN")
                    .map_err(|_| ConfigError::Missing("ADMIN_API_TOKEN"))?;
                if token.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "ADMIN_API_TOKEN must be at least 32 characters",
                    ));
                }
                token
            },
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 20)?,

            // Webhooks
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            webhook_tolerance: Duration::from_secs(parsed("WEBHOOK_TOLERANCE_SECONDS", 300)?),
            webhook_dedupe_events: parsed("WEBHOOK_DEDUPE_EVENTS", false)?,

            // Billing
            payout_concurrency: parsed("PAYOUT_CONCURRENCY", DEFAULT_PAYOUT_CONCURRENCY)?
                .clamp(1, MAX_PAYOUT_CONCURRENCY),
            settings_cache_ttl: Duration::from_secs(parsed(
                "SETTINGS_CACHE_TTL_SECONDS",
                DEFAULT_SETTINGS_TTL.as_secs(),
            )?),
        })
    }

    pub fn billing_options(&self) -> BillingOptions {
        BillingOptions {
            webhook: WebhookConfig {
                default_secret: self.stripe_webhook_secret.clone(),
                tolerance: self.webhook_tolerance,
                dedupe_events: self.webhook_dedupe_events,
            },
            payout_concurrency: self.payout_concurrency,
            settings_ttl: self.settings_cache_ttl,
        }
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid(name))
        }
        _ => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
