//! Stripe-backed provider gateway
//!
//! Stripe objects are mapped into gateway types through their JSON form, the
//! same shape webhook payloads carry, so one set of extractors serves both.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use stripe::{
    CheckoutSession, CheckoutSessionId, CreatePrice, CreatePriceRecurring,
    CreatePriceRecurringInterval, CreateProduct, CreateTransfer, IdOrCreate, ListPrices, Price,
    PriceId, PriceTaxBehavior, Product, ProductId, RequestStrategy, Subscription, SubscriptionId,
    Transfer, UpdatePrice, UpdateProduct,
};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingInterval, NewPrice, PaymentMode, ProductDraft, ProductPatch, ProviderGateway,
    RemoteLineItem, RemotePrice, RemoteProduct, RemoteSubscription, RemoteTransfer, TaxBehavior,
    TransferRequest,
};

const PRICE_PAGE_SIZE: u64 = 100;

/// Provider gateway over the Stripe API
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Run one Stripe call under the configured timeout
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        let timeout = self.stripe.config().timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation = operation, error = %e, "Stripe request failed");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(
                    operation = operation,
                    timeout_secs = timeout.as_secs(),
                    "Stripe request timed out"
                );
                Err(BillingError::ProviderTimeout(timeout.as_secs()))
            }
        }
    }

    /// Run a read-only Stripe call with bounded retries
    async fn read<T, F, Fut>(&self, operation: &'static str, mut call: F) -> BillingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, stripe::StripeError>>,
    {
        // 100ms, 200ms, 400ms ...
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.stripe.config().read_attempts.saturating_sub(1));

        Retry::spawn(strategy, || self.bounded(operation, call())).await
    }
}

#[async_trait]
impl ProviderGateway for StripeGateway {
    async fn create_product(&self, draft: &ProductDraft) -> BillingResult<RemoteProduct> {
        let mut params = CreateProduct::new(&draft.name);
        params.description = draft.description.as_deref();
        params.statement_descriptor = draft.statement_descriptor.as_deref();
        if !draft.images.is_empty() {
            params.images = Some(draft.images.clone());
        }
        params.metadata = Some(draft.metadata());

        let product = self
            .bounded(
                "create_product",
                Product::create(self.stripe.inner(), params),
            )
            .await?;

        tracing::info!(product_id = %product.id, name = %draft.name, "Created Stripe product");
        product_from_json(&to_json(&product)?)
    }

    async fn update_product(
        &self,
        product_id: &str,
        patch: &ProductPatch,
    ) -> BillingResult<RemoteProduct> {
        let id = parse_id::<ProductId>(product_id, "product")?;

        let mut params = UpdateProduct::new();
        params.name = patch.name.as_deref();
        params.description = patch.description.clone();
        params.metadata = patch.metadata.clone();
        params.default_price = patch.default_price.as_deref();
        params.active = patch.active;

        let product = self
            .bounded(
                "update_product",
                Product::update(self.stripe.inner(), &id, params),
            )
            .await?;

        tracing::info!(
            product_id = %product.id,
            default_price = ?patch.default_price,
            active = ?patch.active,
            "Updated Stripe product"
        );
        product_from_json(&to_json(&product)?)
    }

    async fn retrieve_product(&self, product_id: &str) -> BillingResult<RemoteProduct> {
        let id = parse_id::<ProductId>(product_id, "product")?;
        let product = self
            .read("retrieve_product", || {
                Product::retrieve(self.stripe.inner(), &id, &[])
            })
            .await?;
        product_from_json(&to_json(&product)?)
    }

    async fn list_prices(&self, product_id: &str) -> BillingResult<Vec<RemotePrice>> {
        let mut prices = Vec::new();
        let mut starting_after: Option<PriceId> = None;

        loop {
            let mut params = ListPrices::new();
            params.product = Some(IdOrCreate::Id(product_id));
            params.limit = Some(PRICE_PAGE_SIZE);
            params.starting_after = starting_after.clone();

            let page = self
                .read("list_prices", || Price::list(self.stripe.inner(), &params))
                .await?;

            for price in &page.data {
                prices.push(price_from_json(&to_json(price)?)?);
            }

            match (page.has_more, page.data.last()) {
                (true, Some(last)) => starting_after = Some(last.id.clone()),
                _ => break,
            }
        }

        tracing::debug!(product_id = %product_id, count = prices.len(), "Listed Stripe prices");
        Ok(prices)
    }

    async fn create_price(&self, price: &NewPrice) -> BillingResult<RemotePrice> {
        let mut params = CreatePrice::new(self.stripe.config().currency);
        params.product = Some(IdOrCreate::Id(&price.product_id));
        params.unit_amount = Some(price.unit_amount);
        params.tax_behavior = Some(match price.tax_behavior {
            TaxBehavior::Inclusive => PriceTaxBehavior::Inclusive,
            TaxBehavior::Exclusive => PriceTaxBehavior::Exclusive,
            TaxBehavior::Unspecified => PriceTaxBehavior::Unspecified,
        });
        if price.mode == PaymentMode::Recurring {
            let interval = match price.interval {
                Some(BillingInterval::Year) => CreatePriceRecurringInterval::Year,
                _ => CreatePriceRecurringInterval::Month,
            };
            params.recurring = Some(CreatePriceRecurring {
                interval,
                trial_period_days: price.trial_days,
                ..Default::default()
            });
        }

        let created = self
            .bounded("create_price", Price::create(self.stripe.inner(), params))
            .await?;

        tracing::info!(
            price_id = %created.id,
            product_id = %price.product_id,
            unit_amount = price.unit_amount,
            "Created Stripe price"
        );
        price_from_json(&to_json(&created)?)
    }

    async fn set_price_active(&self, price_id: &str, active: bool) -> BillingResult<RemotePrice> {
        let id = parse_id::<PriceId>(price_id, "price")?;
        let mut params = UpdatePrice::new();
        params.active = Some(active);

        let updated = self
            .bounded(
                "set_price_active",
                Price::update(self.stripe.inner(), &id, params),
            )
            .await?;

        tracing::info!(price_id = %price_id, active = active, "Updated Stripe price status");
        price_from_json(&to_json(&updated)?)
    }

    async fn retrieve_price(&self, price_id: &str) -> BillingResult<RemotePrice> {
        let id = parse_id::<PriceId>(price_id, "price")?;
        let price = self
            .read("retrieve_price", || {
                Price::retrieve(self.stripe.inner(), &id, &[])
            })
            .await?;
        price_from_json(&to_json(&price)?)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<RemoteSubscription> {
        let id = parse_id::<SubscriptionId>(subscription_id, "subscription")?;
        let subscription = self
            .read("retrieve_subscription", || {
                Subscription::retrieve(self.stripe.inner(), &id, &[])
            })
            .await?;
        subscription_from_json(&to_json(&subscription)?)
    }

    async fn list_line_items(&self, session_id: &str) -> BillingResult<Vec<RemoteLineItem>> {
        let id = parse_id::<CheckoutSessionId>(session_id, "checkout session")?;
        let session = self
            .read("list_line_items", || {
                CheckoutSession::retrieve(self.stripe.inner(), &id, &["line_items"])
            })
            .await?;
        line_items_from_json(&to_json(&session)?)
    }

    async fn create_transfer(&self, transfer: &TransferRequest) -> BillingResult<RemoteTransfer> {
        let client = self
            .stripe
            .inner()
            .clone()
            .with_strategy(RequestStrategy::Idempotent(
                transfer.idempotency_key.clone(),
            ));

        let mut params = CreateTransfer::new(
            self.stripe.config().currency,
            transfer.destination.clone(),
        );
        params.amount = Some(transfer.amount_cents);
        params.metadata = Some(transfer.metadata.clone());

        let created = self
            .bounded("create_transfer", Transfer::create(&client, params))
            .await?;

        tracing::info!(
            transfer_id = %created.id,
            destination = %transfer.destination,
            amount_cents = transfer.amount_cents,
            "Created Stripe transfer"
        );

        Ok(RemoteTransfer {
            id: created.id.to_string(),
            amount_cents: created.amount,
            destination: transfer.destination.clone(),
        })
    }
}

fn parse_id<T>(raw: &str, what: &str) -> BillingResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid {} ID {}: {}", what, raw, e)))
}

fn to_json<T: Serialize>(object: &T) -> BillingResult<Value> {
    serde_json::to_value(object)
        .map_err(|e| BillingError::StripeApi(format!("Unreadable Stripe object: {}", e)))
}

// =============================================================================
// JSON extractors (shared with webhook payload parsing)
// =============================================================================

/// Identifier of a field that is either an id string or an expanded object
pub(crate) fn expandable_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(object) => object
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

pub(crate) fn string_map(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn required_id(value: &Value, what: &str) -> BillingResult<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BillingError::StripeApi(format!("{} object without id", what)))
}

pub(crate) fn price_from_json(value: &Value) -> BillingResult<RemotePrice> {
    let id = required_id(value, "price")?;
    let recurring = value.get("recurring").filter(|r| r.is_object());

    let tax_behavior = match value.get("tax_behavior").and_then(Value::as_str) {
        Some("inclusive") => TaxBehavior::Inclusive,
        Some("exclusive") => TaxBehavior::Exclusive,
        _ => TaxBehavior::Unspecified,
    };

    Ok(RemotePrice {
        product_id: value
            .get("product")
            .and_then(expandable_id)
            .unwrap_or_default(),
        unit_amount: value
            .get("unit_amount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        currency: value
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("usd")
            .to_string(),
        tax_behavior,
        mode: if recurring.is_some() {
            PaymentMode::Recurring
        } else {
            PaymentMode::OneTime
        },
        interval: recurring
            .and_then(|r| r.get("interval"))
            .and_then(Value::as_str)
            .and_then(BillingInterval::parse),
        trial_days: recurring
            .and_then(|r| r.get("trial_period_days"))
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok()),
        active: value.get("active").and_then(Value::as_bool).unwrap_or(true),
        id,
    })
}

pub(crate) fn product_from_json(value: &Value) -> BillingResult<RemoteProduct> {
    let optional_string = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(RemoteProduct {
        id: required_id(value, "product")?,
        name: optional_string("name").unwrap_or_default(),
        description: optional_string("description"),
        images: value
            .get("images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        statement_descriptor: optional_string("statement_descriptor"),
        tax_code: value.get("tax_code").and_then(expandable_id),
        metadata: value.get("metadata").map(string_map).unwrap_or_default(),
        active: value.get("active").and_then(Value::as_bool).unwrap_or(true),
        default_price: value.get("default_price").and_then(expandable_id),
    })
}

pub(crate) fn subscription_from_json(value: &Value) -> BillingResult<RemoteSubscription> {
    let price = value
        .pointer("/items/data/0/price")
        .filter(|p| p.is_object())
        .map(price_from_json)
        .transpose()?;

    Ok(RemoteSubscription {
        id: required_id(value, "subscription")?,
        customer_id: value.get("customer").and_then(expandable_id),
        metadata: value.get("metadata").map(string_map).unwrap_or_default(),
        price,
    })
}

pub(crate) fn line_items_from_json(session: &Value) -> BillingResult<Vec<RemoteLineItem>> {
    let items = session
        .pointer("/line_items/data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(items
        .iter()
        .filter_map(|item| {
            let price_id = item.get("price").and_then(expandable_id)?;
            Some(RemoteLineItem {
                price_id,
                quantity: item.get("quantity").and_then(Value::as_u64).unwrap_or(1),
                amount_total: item
                    .get("amount_total")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            })
        })
        .collect())
}
