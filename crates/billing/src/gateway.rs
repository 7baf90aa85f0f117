//! Provider gateway
//!
//! Typed boundary around the billing provider's remote objects. No business
//! rules live here: implementations translate between these domain types and
//! the provider's wire objects, bound every call with a timeout, and map
//! failures onto [`BillingError`](crate::error::BillingError).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Metadata key holding the credits granted by a product
pub const CREDITS_METADATA_KEY: &str = "credits";
/// Metadata key holding the rollover flag for a product's credits
pub const CREDITS_ROLLOVER_METADATA_KEY: &str = "credits_rollover";
/// Metadata key holding a stable role/tier identifier for a product
pub const ROLE_METADATA_KEY: &str = "role";
/// Prefix of the metadata keys holding marketing feature strings
pub const FEATURE_METADATA_PREFIX: &str = "feature_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    #[serde(alias = "one-time", alias = "one_off", alias = "one-off")]
    OneTime,
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[serde(alias = "monthly")]
    Month,
    #[serde(alias = "yearly", alias = "annual")]
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "month" => Some(BillingInterval::Month),
            "year" => Some(BillingInterval::Year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxBehavior {
    Inclusive,
    Exclusive,
    #[default]
    Unspecified,
}

/// A price as it currently exists at the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemotePrice {
    pub id: String,
    pub product_id: String,
    /// Minor currency units
    pub unit_amount: i64,
    pub currency: String,
    pub tax_behavior: TaxBehavior,
    pub mode: PaymentMode,
    pub interval: Option<BillingInterval>,
    pub trial_days: Option<u32>,
    pub active: bool,
}

/// Parameters for a price to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrice {
    pub product_id: String,
    pub unit_amount: i64,
    pub mode: PaymentMode,
    pub interval: Option<BillingInterval>,
    pub trial_days: Option<u32>,
    pub tax_behavior: TaxBehavior,
}

/// A product as it currently exists at the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteProduct {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub statement_descriptor: Option<String>,
    pub tax_code: Option<String>,
    pub metadata: HashMap<String, String>,
    pub active: bool,
    pub default_price: Option<String>,
}

impl RemoteProduct {
    /// Credits granted on purchase, when the product declares an integer amount
    pub fn credits(&self) -> Option<i64> {
        self.metadata
            .get(CREDITS_METADATA_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
    }

    pub fn credits_rollover(&self) -> bool {
        self.metadata
            .get(CREDITS_ROLLOVER_METADATA_KEY)
            .map(|raw| matches!(raw.trim(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }

    /// Role granted to buyers: the explicit `role` metadata when set,
    /// otherwise the display name
    pub fn role_name(&self) -> &str {
        self.metadata
            .get(ROLE_METADATA_KEY)
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.name)
    }

    /// Marketing feature strings in `feature_1..feature_N` order
    pub fn marketing_features(&self) -> Vec<String> {
        let mut features: Vec<(u32, &String)> = self
            .metadata
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(FEATURE_METADATA_PREFIX)
                    .and_then(|n| n.parse::<u32>().ok())
                    .map(|n| (n, value))
            })
            .collect();
        features.sort_by_key(|(n, _)| *n);
        features.into_iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Fields for a product to be created
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub statement_descriptor: Option<String>,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub credits_rollover: bool,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl ProductDraft {
    /// Provider metadata carrying credits, rollover, role and features
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        if let Some(credits) = self.credits {
            metadata.insert(CREDITS_METADATA_KEY.to_string(), credits.to_string());
        }
        metadata.insert(
            CREDITS_ROLLOVER_METADATA_KEY.to_string(),
            self.credits_rollover.to_string(),
        );
        if let Some(role) = self.role.as_deref().filter(|r| !r.trim().is_empty()) {
            metadata.insert(ROLE_METADATA_KEY.to_string(), role.trim().to_string());
        }
        for (index, feature) in self.features.iter().enumerate() {
            metadata.insert(
                format!("{}{}", FEATURE_METADATA_PREFIX, index + 1),
                feature.clone(),
            );
        }
        metadata
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "product name is required".to_string(),
            ));
        }
        if let Some(credits) = self.credits {
            if credits < 0 {
                return Err(BillingError::InvalidInput(format!(
                    "credits must not be negative, got {}",
                    credits
                )));
            }
        }
        Ok(())
    }
}

/// Partial update of a product; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub default_price: Option<String>,
    pub active: Option<bool>,
}

impl ProductPatch {
    pub fn default_price(price_id: impl Into<String>) -> Self {
        Self {
            default_price: Some(price_id.into()),
            ..Default::default()
        }
    }

    pub fn archive() -> Self {
        Self {
            active: Some(false),
            ..Default::default()
        }
    }
}

/// Subscription fields the webhook processor needs
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSubscription {
    pub id: String,
    pub customer_id: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Price of the first subscription item
    pub price: Option<RemotePrice>,
}

/// One purchased line of a checkout session
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLineItem {
    pub price_id: String,
    pub quantity: u64,
    pub amount_total: i64,
}

/// A transfer of funds to a connected payout account
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub amount_cents: i64,
    pub destination: String,
    /// Re-submitting the same key never produces a second transfer
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTransfer {
    pub id: String,
    pub amount_cents: i64,
    pub destination: String,
}

/// Remote object operations of the billing provider
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn create_product(&self, draft: &ProductDraft) -> BillingResult<RemoteProduct>;

    async fn update_product(
        &self,
        product_id: &str,
        patch: &ProductPatch,
    ) -> BillingResult<RemoteProduct>;

    async fn retrieve_product(&self, product_id: &str) -> BillingResult<RemoteProduct>;

    /// All prices of a product, active and archived
    async fn list_prices(&self, product_id: &str) -> BillingResult<Vec<RemotePrice>>;

    async fn create_price(&self, price: &NewPrice) -> BillingResult<RemotePrice>;

    /// Archive (`false`) or reactivate (`true`) a price
    async fn set_price_active(&self, price_id: &str, active: bool) -> BillingResult<RemotePrice>;

    async fn retrieve_price(&self, price_id: &str) -> BillingResult<RemotePrice>;

    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<RemoteSubscription>;

    async fn list_line_items(&self, session_id: &str) -> BillingResult<Vec<RemoteLineItem>>;

    async fn create_transfer(&self, transfer: &TransferRequest) -> BillingResult<RemoteTransfer>;
}
