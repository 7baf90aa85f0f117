//! Common types used across the storefront

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Stable external user identifier (the identity provider's subject id).
/// User rows are matched on this value, never on a surrogate key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Roles
// =============================================================================

/// Role string stored for the admin account type
pub const ADMIN_ROLE: &str = "admin";

/// Role a user falls back to when their subscription ends
pub const FREE_ROLE: &str = "free";

/// User role. Paid tiers are open-ended strings derived from the purchased
/// product, so the enum keeps them as data rather than variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserRole {
    Free,
    Admin,
    Tier(String),
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Free => FREE_ROLE,
            UserRole::Admin => ADMIN_ROLE,
            UserRole::Tier(name) => name,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl From<String> for UserRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            ADMIN_ROLE => UserRole::Admin,
            FREE_ROLE | "" => UserRole::Free,
            _ => UserRole::Tier(value),
        }
    }
}

impl From<&str> for UserRole {
    fn from(value: &str) -> Self {
        UserRole::from(value.to_string())
    }
}

impl From<UserRole> for String {
    fn from(role: UserRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transaction records
// =============================================================================

/// Interval label stored for non-recurring purchases
pub const ONE_OFF_INTERVAL: &str = "one-off";

/// Status of a transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "one-off")]
    OneOff,
}

/// One purchase or subscription lifecycle entry in a user's inline ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Provider transaction identifier, unique within one user's collection
    pub transaction_id: String,
    pub status: TransactionStatus,
    /// Event that last wrote this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub product_id: String,
    pub product_name: String,
    /// Decimal major-unit price, e.g. "15.00"
    pub price: String,
    /// `month`, `year` or `one-off`
    pub interval: String,
    /// RFC 3339 timestamp of the last payment
    pub last_payment_at: String,
    /// Keys written by older clients are carried through merges untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionRecord {
    /// Shallow-merge `newer` over this record. Every typed field is replaced;
    /// an absent `event_id` keeps the previous one; unknown keys are merged
    /// key by key.
    pub fn merge_from(&mut self, newer: TransactionRecord) {
        let TransactionRecord {
            transaction_id,
            status,
            event_id,
            product_id,
            product_name,
            price,
            interval,
            last_payment_at,
            extra,
        } = newer;

        self.transaction_id = transaction_id;
        self.status = status;
        if event_id.is_some() {
            self.event_id = event_id;
        }
        self.product_id = product_id;
        self.product_name = product_name;
        self.price = price;
        self.interval = interval;
        self.last_payment_at = last_payment_at;
        for (key, value) in extra {
            self.extra.insert(key, value);
        }
    }
}

/// User account fields the billing engine reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub role: UserRole,
    pub credits: i64,
    pub trial_credits_claimed: bool,
    pub transactions: Vec<TransactionRecord>,
    /// Bumped on every ledger write; used for compare-and-swap
    pub ledger_version: i64,
}

// =============================================================================
// Affiliate transactions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateStatus {
    Pending,
    Paid,
}

impl AffiliateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliateStatus::Pending => "pending",
            AffiliateStatus::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AffiliateStatus::Pending),
            "paid" => Some(AffiliateStatus::Paid),
            _ => None,
        }
    }
}

/// Commission owed to a referring user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateTransaction {
    pub id: Uuid,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    /// Gross purchase amount in minor units
    pub amount_cents: i64,
    pub status: AffiliateStatus,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    /// Commission owed in minor units
    pub commission_cents: i64,
    pub affiliate_user_id: UserId,
    pub payout_id: Option<String>,
    #[serde(with = "time::serde::timestamp::option")]
    pub paid_at: Option<OffsetDateTime>,
}

/// A commission to be recorded for a referred purchase
#[derive(Debug, Clone, PartialEq)]
pub struct NewAffiliateCommission {
    /// Checkout session that produced the commission; recording is
    /// idempotent on this value
    pub source_reference: String,
    pub affiliate_user_id: UserId,
    pub amount_cents: i64,
    pub commission_cents: i64,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
}
