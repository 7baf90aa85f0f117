//! Scoped site settings cache
//!
//! One cache per service instance, filled from a [`SettingsSource`] and
//! dropped either on TTL expiry or through [`SettingsCache::invalidate`],
//! which the server wires to database change notifications.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::BillingResult;
use crate::store::{SettingsSource, SiteSettings};

/// Default cache TTL (5 minutes)
pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(300);

struct CachedSettings {
    settings: SiteSettings,
    expires_at: Instant,
}

pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    entry: RwLock<Option<CachedSettings>>,
    ttl: Duration,
}

impl SettingsCache {
    pub fn new(source: Arc<dyn SettingsSource>) -> Self {
        Self::with_ttl(source, DEFAULT_SETTINGS_TTL)
    }

    pub fn with_ttl(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Current settings, loading them when the cache is empty or stale
    pub async fn get(&self) -> BillingResult<SiteSettings> {
        if let Some(settings) = self.cached() {
            return Ok(settings);
        }

        let settings = self.source.load_site_settings().await?;
        if let Ok(mut entry) = self.entry.write() {
            *entry = Some(CachedSettings {
                settings: settings.clone(),
                expires_at: Instant::now() + self.ttl,
            });
        }
        tracing::debug!(site_name = %settings.site_name, "Loaded site settings");
        Ok(settings)
    }

    /// Drop the cached value; the next read goes to the source
    pub fn invalidate(&self) {
        if let Ok(mut entry) = self.entry.write() {
            *entry = None;
        }
        tracing::debug!("Site settings cache invalidated");
    }

    fn cached(&self) -> Option<SiteSettings> {
        let entry = self.entry.read().ok()?;
        entry
            .as_ref()
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| cached.settings.clone())
    }
}

/// Signing secret for inbound events: tenant settings first, then the
/// process-wide default
pub fn resolve_webhook_secret(
    settings: &SiteSettings,
    fallback: Option<&str>,
) -> Option<String> {
    settings
        .webhook_secret
        .as_deref()
        .or(fallback)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
