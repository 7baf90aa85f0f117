#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Storefront API Server
//!
//! Serves the billing webhook and the catalog, payout and trial credit admin
//! routes on top of the billing engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{postgres::PgListener, PgPool};
use storefront_api::{create_router, AppState, Config, LogFormat};
use storefront_billing::{BillingService, SettingsCache, StripeClient};
use storefront_shared::{create_pool, run_migrations};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Channel the `site_settings` trigger notifies on
const SETTINGS_CHANNEL: &str = "site_settings_changed";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    tracing::info!("Starting Storefront API Server v{}", env!("CARGO_PKG_VERSION"));

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database ready");

    let stripe = StripeClient::from_env()?;
    let billing = BillingService::with_postgres(stripe, pool.clone(), config.billing_options());

    tokio::spawn(watch_settings(pool.clone(), billing.settings().clone()));

    let addr: SocketAddr = config.bind_address.parse()?;
    let state = AppState::new(pool, config, billing);
    let app = create_router(state).layer(TraceLayer::new_for_http());

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,storefront_api=debug,storefront_billing=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Drop cached site settings whenever the settings row changes
async fn watch_settings(pool: PgPool, cache: Arc<SettingsCache>) {
    loop {
        if let Err(e) = listen_for_settings(&pool, &cache).await {
            tracing::warn!(error = %e, "Site settings listener dropped, reconnecting");
        }
        // Notifications sent while disconnected are lost
        cache.invalidate();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn listen_for_settings(pool: &PgPool, cache: &SettingsCache) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(SETTINGS_CHANNEL).await?;
    tracing::info!(channel = SETTINGS_CHANNEL, "Listening for site settings changes");

    loop {
        let notification = listener.recv().await?;
        tracing::debug!(payload = notification.payload(), "Site settings changed");
        cache.invalidate();
    }
}
