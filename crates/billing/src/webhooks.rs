//! Webhook event processing
//!
//! Each delivery moves through `Received -> Verified -> Dispatched` and ends
//! in `Applied`, `Rejected` (bad signature) or `Failed` (downstream error, the
//! provider redelivers). Events that cannot be attributed to a user are
//! acknowledged and discarded so they are not redelivered forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Map;

use storefront_shared::{
    format_minor_units, NewAffiliateCommission, TransactionRecord, TransactionStatus, UserAccount,
    UserId, ONE_OFF_INTERVAL,
};

use crate::credits::{settle, SettlementMode};
use crate::error::{BillingError, BillingResult, ErrorKind};
use crate::events::{
    BillingEvent, CheckoutSessionPayload, InvoicePayload, SubscriptionPayload, WebhookEvent,
};
use crate::gateway::{ProviderGateway, RemotePrice, RemoteProduct};
use crate::ledger::TransactionLedger;
use crate::settings::{resolve_webhook_secret, SettingsCache};
use crate::signature::{verify_event, DEFAULT_TOLERANCE};
use crate::store::{LedgerStore, SiteSettings};

/// Product name written on the terminal record of a cancelled subscription
pub const CANCELLED_PRODUCT_NAME: &str = "Subscription cancelled";

/// How long applied event ids are remembered when deduplication is on.
/// Stripe stops redelivering after three days.
const SEEN_EVENTS_TTL: Duration = Duration::from_secs(72 * 60 * 60);

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Process-wide signing secret, used when the tenant has none
    pub default_secret: Option<String>,
    pub tolerance: Duration,
    /// Skip events whose id was already applied
    pub dedupe_events: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_secret: None,
            tolerance: DEFAULT_TOLERANCE,
            dedupe_events: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    /// Kind the engine does not act on, or a one-time invoice
    Ignored,
    /// No user linkage; acknowledged and dropped
    Discarded,
    /// Event id already applied
    Duplicate,
}

/// Recently applied event ids
pub struct SeenEvents {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl SeenEvents {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .get(event_id)
                    .is_some_and(|seen_at| seen_at.elapsed() < self.ttl)
            })
            .unwrap_or(false)
    }

    pub fn mark(&self, event_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            let ttl = self.ttl;
            entries.retain(|_, seen_at| seen_at.elapsed() < ttl);
            entries.insert(event_id.to_string(), Instant::now());
        }
    }
}

pub struct WebhookProcessor {
    gateway: Arc<dyn ProviderGateway>,
    store: Arc<dyn LedgerStore>,
    ledger: TransactionLedger,
    settings: Arc<SettingsCache>,
    config: WebhookConfig,
    seen: Option<SeenEvents>,
}

impl WebhookProcessor {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        store: Arc<dyn LedgerStore>,
        settings: Arc<SettingsCache>,
        config: WebhookConfig,
    ) -> Self {
        let seen = config
            .dedupe_events
            .then(|| SeenEvents::new(SEEN_EVENTS_TTL));
        Self {
            ledger: TransactionLedger::new(store.clone()),
            gateway,
            store,
            settings,
            config,
            seen,
        }
    }

    /// Verify and apply one delivery. `payload` must be the raw request body.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        tracing::debug!(bytes = payload.len(), "Webhook received");

        let settings = self.settings.get().await?;
        let secret = resolve_webhook_secret(&settings, self.config.default_secret.as_deref());

        let event = match verify_event(payload, signature, secret.as_deref(), self.config.tolerance)
        {
            Ok(event) => event,
            Err(e) if e.kind() == ErrorKind::Unattributable => {
                tracing::warn!(error = %e, "Signed webhook payload unusable, discarded");
                return Ok(WebhookOutcome::Discarded);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Webhook rejected");
                return Err(e);
            }
        };

        tracing::info!(event_id = %event.id, kind = %event.event, "Webhook verified");

        if let Some(seen) = &self.seen {
            if seen.contains(&event.id) {
                tracing::info!(event_id = %event.id, "Webhook already applied, skipping");
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        tracing::debug!(event_id = %event.id, kind = %event.event, "Webhook dispatched");

        match self.dispatch(&event, &settings).await {
            Ok(outcome) => {
                if outcome == WebhookOutcome::Applied {
                    if let Some(seen) = &self.seen {
                        seen.mark(&event.id);
                    }
                }
                tracing::info!(event_id = %event.id, outcome = ?outcome, "Webhook processed");
                Ok(outcome)
            }
            Err(BillingError::Unattributable(reason)) => {
                tracing::warn!(
                    event_id = %event.id,
                    kind = %event.event,
                    reason = %reason,
                    "Webhook discarded"
                );
                Ok(WebhookOutcome::Discarded)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    kind = %event.event,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Webhook failed"
                );
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        event: &WebhookEvent,
        settings: &SiteSettings,
    ) -> BillingResult<WebhookOutcome> {
        match &event.event {
            BillingEvent::CheckoutCompleted(session) => {
                self.checkout_completed(event, session, settings).await
            }
            BillingEvent::InvoicePaid(invoice) => self.invoice_paid(event, invoice).await,
            BillingEvent::SubscriptionDeleted(subscription) => {
                self.subscription_deleted(event, subscription).await
            }
            BillingEvent::Unhandled { kind } => {
                tracing::debug!(event_id = %event.id, kind = %kind, "Unhandled event kind");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn checkout_completed(
        &self,
        event: &WebhookEvent,
        session: &CheckoutSessionPayload,
        settings: &SiteSettings,
    ) -> BillingResult<WebhookOutcome> {
        let user_id = session.user_id().ok_or_else(|| {
            BillingError::Unattributable(format!("checkout session {} has no userId", session.id))
        })?;
        let user = self.account(&user_id).await?;

        let line_items = self.gateway.list_line_items(&session.id).await?;
        let item = line_items.first().ok_or_else(|| {
            BillingError::Unattributable(format!(
                "checkout session {} has no purchased price",
                session.id
            ))
        })?;
        let price = self.gateway.retrieve_price(&item.price_id).await?;
        let product = self.gateway.retrieve_product(&price.product_id).await?;

        let status = if session.mode.is_recurring() {
            TransactionStatus::Active
        } else {
            TransactionStatus::OneOff
        };
        let paid_at = if session.created > 0 {
            session.created
        } else {
            event.created
        };
        let record = purchase_record(
            session.transaction_id(),
            status,
            &event.id,
            &product,
            &price,
            paid_at,
        );
        self.ledger.upsert(&user_id, record, true).await?;

        self.grant_credits(&user, &product, SettlementMode::InitialGrant)
            .await?;
        self.record_commission(&user_id, session, settings).await?;

        Ok(WebhookOutcome::Applied)
    }

    async fn invoice_paid(
        &self,
        event: &WebhookEvent,
        invoice: &InvoicePayload,
    ) -> BillingResult<WebhookOutcome> {
        let Some(subscription_id) = invoice.subscription_id.as_deref() else {
            tracing::debug!(invoice_id = %invoice.id, "Invoice not tied to a subscription");
            return Ok(WebhookOutcome::Ignored);
        };

        let subscription = self.gateway.retrieve_subscription(subscription_id).await?;
        let user_id = subscription
            .metadata
            .get("userId")
            .or_else(|| subscription.metadata.get("user_id"))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(UserId::from)
            .ok_or_else(|| {
                BillingError::Unattributable(format!(
                    "subscription {} has no userId",
                    subscription_id
                ))
            })?;
        let user = self.account(&user_id).await?;

        let price = invoice
            .price
            .clone()
            .or(subscription.price)
            .ok_or_else(|| {
                BillingError::Unattributable(format!("invoice {} has no price", invoice.id))
            })?;
        let product = self.gateway.retrieve_product(&price.product_id).await?;

        let paid_at = if invoice.paid_at > 0 {
            invoice.paid_at
        } else {
            event.created
        };
        let record = purchase_record(
            subscription_id,
            TransactionStatus::Active,
            &event.id,
            &product,
            &price,
            paid_at,
        );
        self.ledger.upsert(&user_id, record, true).await?;

        if invoice.is_subscription_create() {
            // Credits for the first period were granted by the checkout
            tracing::debug!(
                invoice_id = %invoice.id,
                user_id = %user_id,
                "First subscription invoice, credits already granted"
            );
        } else {
            self.grant_credits(&user, &product, SettlementMode::Renewal)
                .await?;
        }

        Ok(WebhookOutcome::Applied)
    }

    async fn subscription_deleted(
        &self,
        event: &WebhookEvent,
        subscription: &SubscriptionPayload,
    ) -> BillingResult<WebhookOutcome> {
        let user_id = subscription.user_id().ok_or_else(|| {
            BillingError::Unattributable(format!(
                "subscription {} has no userId",
                subscription.id
            ))
        })?;
        let user = self.account(&user_id).await?;

        let record = TransactionRecord {
            transaction_id: subscription.id.clone(),
            status: TransactionStatus::OneOff,
            event_id: Some(event.id.clone()),
            product_id: subscription
                .price
                .as_ref()
                .map(|p| p.product_id.clone())
                .unwrap_or_default(),
            product_name: CANCELLED_PRODUCT_NAME.to_string(),
            price: format_minor_units(0),
            interval: ONE_OFF_INTERVAL.to_string(),
            last_payment_at: rfc3339(event.created),
            extra: Map::new(),
        };
        self.ledger.upsert(&user_id, record, true).await?;

        let settlement = settle(
            user.credits,
            &user.role,
            0,
            false,
            SettlementMode::Cancellation,
            "",
        )?;
        if settlement.role != user.role {
            self.store.set_role(&user_id, &settlement.role).await?;
            tracing::info!(
                user_id = %user_id,
                previous_role = %user.role,
                role = %settlement.role,
                "Subscription ended, role downgraded"
            );
        }

        Ok(WebhookOutcome::Applied)
    }

    async fn account(&self, user_id: &UserId) -> BillingResult<UserAccount> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::Unattributable(format!("unknown user {}", user_id)))
    }

    async fn grant_credits(
        &self,
        user: &UserAccount,
        product: &RemoteProduct,
        mode: SettlementMode,
    ) -> BillingResult<()> {
        let Some(credits) = product.credits() else {
            return Ok(());
        };
        if credits < 0 {
            tracing::warn!(
                product_id = %product.id,
                credits = credits,
                "Product declares negative credits, settlement skipped"
            );
            return Ok(());
        }

        let settlement = settle(
            user.credits,
            &user.role,
            credits,
            product.credits_rollover(),
            mode,
            product.role_name(),
        )?;
        self.store
            .set_credits_and_role(&user.user_id, settlement.balance, &settlement.role)
            .await?;

        tracing::info!(
            user_id = %user.user_id,
            mode = ?mode,
            granted = credits,
            previous_balance = user.credits,
            balance = settlement.balance,
            role = %settlement.role,
            "Credits settled"
        );
        Ok(())
    }

    async fn record_commission(
        &self,
        buyer: &UserId,
        session: &CheckoutSessionPayload,
        settings: &SiteSettings,
    ) -> BillingResult<()> {
        let Some(affiliate) = session.affiliate_user_id() else {
            return Ok(());
        };
        let percent = settings.affiliate_commission_percent;
        if percent <= 0 || session.amount_total <= 0 || &affiliate == buyer {
            return Ok(());
        }
        if self.store.get_user(&affiliate).await?.is_none() {
            tracing::warn!(
                affiliate_user_id = %affiliate,
                session_id = %session.id,
                "Referring user not found, commission skipped"
            );
            return Ok(());
        }

        let commission = NewAffiliateCommission {
            source_reference: session.id.clone(),
            affiliate_user_id: affiliate.clone(),
            amount_cents: session.amount_total,
            commission_cents: session.amount_total * percent / 100,
            customer_id: session.customer_id.clone(),
            customer_email: session.customer_email.clone(),
        };

        if self.store.record_affiliate_commission(&commission).await? {
            tracing::info!(
                affiliate_user_id = %affiliate,
                session_id = %session.id,
                commission_cents = commission.commission_cents,
                "Affiliate commission recorded"
            );
        } else {
            tracing::debug!(session_id = %session.id, "Affiliate commission already recorded");
        }
        Ok(())
    }
}

fn purchase_record(
    transaction_id: &str,
    status: TransactionStatus,
    event_id: &str,
    product: &RemoteProduct,
    price: &RemotePrice,
    paid_at: i64,
) -> TransactionRecord {
    TransactionRecord {
        transaction_id: transaction_id.to_string(),
        status,
        event_id: Some(event_id.to_string()),
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        price: format_minor_units(price.unit_amount),
        interval: match status {
            TransactionStatus::OneOff => ONE_OFF_INTERVAL.to_string(),
            TransactionStatus::Active => price
                .interval
                .map(|i| i.as_str().to_string())
                .unwrap_or_else(|| ONE_OFF_INTERVAL.to_string()),
        },
        last_payment_at: rfc3339(paid_at),
        extra: Map::new(),
    }
}

fn rfc3339(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
