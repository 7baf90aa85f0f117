//! Ledger store ports
//!
//! Typed read/update operations on user accounts, their inline transaction
//! collection and affiliate transactions. User rows are matched on the
//! stable external [`UserId`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use storefront_shared::{
    AffiliateTransaction, NewAffiliateCommission, TransactionRecord, UserAccount, UserId, UserRole,
};

use crate::error::BillingResult;

/// Tenant-level settings the billing engine consults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteSettings {
    pub site_name: String,
    /// Tenant webhook signing secret; takes precedence over the process default
    pub webhook_secret: Option<String>,
    pub trial_credits: i64,
    pub trial_credits_enabled: bool,
    /// Whole percent of a referred purchase owed to the affiliate; 0 disables
    pub affiliate_commission_percent: i64,
}

/// Snapshot of a user's inline ledger and its version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub records: Vec<TransactionRecord>,
    pub version: i64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_user(&self, user_id: &UserId) -> BillingResult<Option<UserAccount>>;

    /// Current transaction collection, empty when the user has none
    async fn get_ledger(&self, user_id: &UserId) -> BillingResult<LedgerSnapshot>;

    /// Write the whole collection if the stored version still equals
    /// `expected_version`. Returns `false` when another writer got there first.
    async fn replace_ledger(
        &self,
        user_id: &UserId,
        records: &[TransactionRecord],
        expected_version: i64,
    ) -> BillingResult<bool>;

    async fn set_credits_and_role(
        &self,
        user_id: &UserId,
        credits: i64,
        role: &UserRole,
    ) -> BillingResult<()>;

    async fn set_role(&self, user_id: &UserId, role: &UserRole) -> BillingResult<()>;

    /// Add `amount` credits and set the claimed flag, only if it was unset.
    /// Returns the new balance, or `None` when the flag was already set.
    async fn claim_trial_credits(&self, user_id: &UserId, amount: i64)
        -> BillingResult<Option<i64>>;

    /// Insert a pending commission. Returns `false` when one already exists
    /// for the same source reference.
    async fn record_affiliate_commission(
        &self,
        commission: &NewAffiliateCommission,
    ) -> BillingResult<bool>;

    /// The named affiliate transactions that are still pending
    async fn get_pending_affiliate_transactions(
        &self,
        ids: &[Uuid],
    ) -> BillingResult<Vec<AffiliateTransaction>>;

    /// Connected payout account of a user, if any
    async fn payout_destination(&self, user_id: &UserId) -> BillingResult<Option<String>>;

    /// Transition pending -> paid. Returns `false` if the row was no longer pending.
    async fn mark_affiliate_paid(
        &self,
        id: Uuid,
        payout_id: &str,
        paid_at: OffsetDateTime,
    ) -> BillingResult<bool>;
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load_site_settings(&self) -> BillingResult<SiteSettings>;
}
