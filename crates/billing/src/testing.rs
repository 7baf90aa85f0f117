//! In-memory fakes of the provider gateway and ledger store

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use storefront_shared::{
    AffiliateStatus, AffiliateTransaction, NewAffiliateCommission, TransactionRecord, UserAccount,
    UserId, UserRole,
};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingInterval, NewPrice, PaymentMode, ProductDraft, ProductPatch, ProviderGateway,
    RemoteLineItem, RemotePrice, RemoteProduct, RemoteSubscription, RemoteTransfer, TaxBehavior,
    TransferRequest,
};
use crate::signature::compute_signature;
use crate::store::{LedgerSnapshot, LedgerStore, SettingsSource, SiteSettings};

// ============================================================================
// Builders
// ============================================================================

pub fn remote_price(
    id: &str,
    product_id: &str,
    amount: i64,
    interval: Option<BillingInterval>,
    active: bool,
) -> RemotePrice {
    RemotePrice {
        id: id.to_string(),
        product_id: product_id.to_string(),
        unit_amount: amount,
        currency: "usd".to_string(),
        tax_behavior: TaxBehavior::Exclusive,
        mode: if interval.is_some() {
            PaymentMode::Recurring
        } else {
            PaymentMode::OneTime
        },
        interval,
        trial_days: None,
        active,
    }
}

pub fn remote_product(id: &str, name: &str, metadata: &[(&str, &str)]) -> RemoteProduct {
    RemoteProduct {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        images: vec![],
        statement_descriptor: None,
        tax_code: None,
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        active: true,
        default_price: None,
    }
}

/// `Stripe-Signature` header for a body signed now
pub fn sign(body: &[u8], secret: &str) -> String {
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    let signature = compute_signature(secret, timestamp, body).unwrap();
    format!("t={},v1={}", timestamp, signature)
}

// ============================================================================
// FakeGateway
// ============================================================================

#[derive(Default)]
pub struct FakeGateway {
    pub products: Mutex<HashMap<String, RemoteProduct>>,
    pub prices: Mutex<Vec<RemotePrice>>,
    pub subscriptions: Mutex<HashMap<String, RemoteSubscription>>,
    pub line_items: Mutex<HashMap<String, Vec<RemoteLineItem>>>,
    pub transfers: Mutex<Vec<TransferRequest>>,
    /// Price ids whose archival times out
    pub fail_archive: Mutex<HashSet<String>>,
    /// Destinations whose transfers are declined
    pub fail_transfer_to: Mutex<HashSet<String>>,
    pub fail_create_price: AtomicBool,
    mutations: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote writes performed so far
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn add_product(&self, product: RemoteProduct) {
        self.products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
    }

    pub fn add_price(&self, price: RemotePrice) {
        self.prices.lock().unwrap().push(price);
    }

    pub fn add_subscription(&self, subscription: RemoteSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    pub fn add_line_item(&self, session_id: &str, price_id: &str) {
        self.line_items
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(RemoteLineItem {
                price_id: price_id.to_string(),
                quantity: 1,
                amount_total: 0,
            });
    }

    pub fn product(&self, id: &str) -> RemoteProduct {
        self.products.lock().unwrap().get(id).cloned().unwrap()
    }

    pub fn price(&self, id: &str) -> RemotePrice {
        self.prices
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .unwrap()
    }

    pub fn active_prices(&self, product_id: &str) -> Vec<RemotePrice> {
        self.prices
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.product_id == product_id && p.active)
            .cloned()
            .collect()
    }

    fn mutate(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn missing(what: &str, id: &str) -> BillingError {
        BillingError::StripeApi(format!("No such {}: '{}'", what, id))
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    async fn create_product(&self, draft: &ProductDraft) -> BillingResult<RemoteProduct> {
        self.mutate();
        let mut product = remote_product(&self.next("prod"), &draft.name, &[]);
        product.description = draft.description.clone();
        product.images = draft.images.clone();
        product.metadata = draft.metadata();
        self.add_product(product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        product_id: &str,
        patch: &ProductPatch,
    ) -> BillingResult<RemoteProduct> {
        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(product_id)
            .ok_or_else(|| Self::missing("product", product_id))?;
        self.mutate();

        if let Some(name) = &patch.name {
            product.name = name.clone();
        }
        if let Some(description) = &patch.description {
            product.description = Some(description.clone());
        }
        if let Some(metadata) = &patch.metadata {
            for (key, value) in metadata {
                if value.is_empty() {
                    product.metadata.remove(key);
                } else {
                    product.metadata.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(default_price) = &patch.default_price {
            product.default_price = Some(default_price.clone());
        }
        if let Some(active) = patch.active {
            product.active = active;
        }
        Ok(product.clone())
    }

    async fn retrieve_product(&self, product_id: &str) -> BillingResult<RemoteProduct> {
        self.products
            .lock()
            .unwrap()
            .get(product_id)
            .cloned()
            .ok_or_else(|| Self::missing("product", product_id))
    }

    async fn list_prices(&self, product_id: &str) -> BillingResult<Vec<RemotePrice>> {
        Ok(self
            .prices
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn create_price(&self, price: &NewPrice) -> BillingResult<RemotePrice> {
        if self.fail_create_price.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("price creation declined".to_string()));
        }
        self.mutate();
        let created = RemotePrice {
            id: self.next("price"),
            product_id: price.product_id.clone(),
            unit_amount: price.unit_amount,
            currency: "usd".to_string(),
            tax_behavior: price.tax_behavior,
            mode: price.mode,
            interval: price.interval,
            trial_days: price.trial_days,
            active: true,
        };
        self.add_price(created.clone());
        Ok(created)
    }

    async fn set_price_active(&self, price_id: &str, active: bool) -> BillingResult<RemotePrice> {
        if !active && self.fail_archive.lock().unwrap().contains(price_id) {
            return Err(BillingError::ProviderTimeout(20));
        }
        let mut prices = self.prices.lock().unwrap();
        let price = prices
            .iter_mut()
            .find(|p| p.id == price_id)
            .ok_or_else(|| Self::missing("price", price_id))?;
        self.mutate();
        price.active = active;
        Ok(price.clone())
    }

    async fn retrieve_price(&self, price_id: &str) -> BillingResult<RemotePrice> {
        self.prices
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == price_id)
            .cloned()
            .ok_or_else(|| Self::missing("price", price_id))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<RemoteSubscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| Self::missing("subscription", subscription_id))
    }

    async fn list_line_items(&self, session_id: &str) -> BillingResult<Vec<RemoteLineItem>> {
        Ok(self
            .line_items
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_transfer(&self, transfer: &TransferRequest) -> BillingResult<RemoteTransfer> {
        if self
            .fail_transfer_to
            .lock()
            .unwrap()
            .contains(&transfer.destination)
        {
            return Err(BillingError::StripeApi("transfer declined".to_string()));
        }
        self.mutate();
        self.transfers.lock().unwrap().push(transfer.clone());
        Ok(RemoteTransfer {
            id: self.next("tr"),
            amount_cents: transfer.amount_cents,
            destination: transfer.destination.clone(),
        })
    }
}

// ============================================================================
// InMemoryLedgerStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryLedgerStore {
    pub users: Mutex<HashMap<UserId, UserAccount>>,
    pub destinations: Mutex<HashMap<UserId, String>>,
    /// (source reference, transaction)
    pub affiliates: Mutex<Vec<(String, AffiliateTransaction)>>,
    pub settings: Mutex<SiteSettings>,
    /// Every write fails with a database error
    pub fail_writes: AtomicBool,
    /// Ledger writes to reject as if another writer won the race
    pub lose_races: AtomicUsize,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, role: UserRole, credits: i64) -> UserId {
        let user_id = UserId::from(id);
        self.users.lock().unwrap().insert(
            user_id.clone(),
            UserAccount {
                user_id: user_id.clone(),
                role,
                credits,
                trial_credits_claimed: false,
                transactions: vec![],
                ledger_version: 0,
            },
        );
        user_id
    }

    pub fn user(&self, id: &UserId) -> UserAccount {
        self.users.lock().unwrap().get(id).cloned().unwrap()
    }

    pub fn set_destination(&self, user_id: &UserId, destination: &str) {
        self.destinations
            .lock()
            .unwrap()
            .insert(user_id.clone(), destination.to_string());
    }

    pub fn add_pending_commission(&self, affiliate: &UserId, commission_cents: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.affiliates.lock().unwrap().push((
            id.to_string(),
            AffiliateTransaction {
                id,
                created_at: OffsetDateTime::now_utc(),
                amount_cents: commission_cents * 10,
                status: AffiliateStatus::Pending,
                customer_id: None,
                customer_email: None,
                commission_cents,
                affiliate_user_id: affiliate.clone(),
                payout_id: None,
                paid_at: None,
            },
        ));
        id
    }

    pub fn affiliate(&self, id: Uuid) -> AffiliateTransaction {
        self.affiliates
            .lock()
            .unwrap()
            .iter()
            .find(|(_, t)| t.id == id)
            .map(|(_, t)| t.clone())
            .unwrap()
    }

    fn check_writable(&self) -> BillingResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_user(&self, user_id: &UserId) -> BillingResult<Option<UserAccount>> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn get_ledger(&self, user_id: &UserId) -> BillingResult<LedgerSnapshot> {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .map(|u| LedgerSnapshot {
                records: u.transactions.clone(),
                version: u.ledger_version,
            })
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))
    }

    async fn replace_ledger(
        &self,
        user_id: &UserId,
        records: &[TransactionRecord],
        expected_version: i64,
    ) -> BillingResult<bool> {
        self.check_writable()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        let lost = self
            .lose_races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            user.ledger_version += 1;
            return Ok(false);
        }
        if user.ledger_version != expected_version {
            return Ok(false);
        }
        user.transactions = records.to_vec();
        user.ledger_version += 1;
        Ok(true)
    }

    async fn set_credits_and_role(
        &self,
        user_id: &UserId,
        credits: i64,
        role: &UserRole,
    ) -> BillingResult<()> {
        self.check_writable()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        user.credits = credits;
        user.role = role.clone();
        Ok(())
    }

    async fn set_role(&self, user_id: &UserId, role: &UserRole) -> BillingResult<()> {
        self.check_writable()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        user.role = role.clone();
        Ok(())
    }

    async fn claim_trial_credits(
        &self,
        user_id: &UserId,
        amount: i64,
    ) -> BillingResult<Option<i64>> {
        self.check_writable()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        if user.trial_credits_claimed {
            return Ok(None);
        }
        user.trial_credits_claimed = true;
        user.credits += amount;
        Ok(Some(user.credits))
    }

    async fn record_affiliate_commission(
        &self,
        commission: &NewAffiliateCommission,
    ) -> BillingResult<bool> {
        self.check_writable()?;
        let mut affiliates = self.affiliates.lock().unwrap();
        if affiliates
            .iter()
            .any(|(source, _)| source == &commission.source_reference)
        {
            return Ok(false);
        }
        affiliates.push((
            commission.source_reference.clone(),
            AffiliateTransaction {
                id: Uuid::new_v4(),
                created_at: OffsetDateTime::now_utc(),
                amount_cents: commission.amount_cents,
                status: AffiliateStatus::Pending,
                customer_id: commission.customer_id.clone(),
                customer_email: commission.customer_email.clone(),
                commission_cents: commission.commission_cents,
                affiliate_user_id: commission.affiliate_user_id.clone(),
                payout_id: None,
                paid_at: None,
            },
        ));
        Ok(true)
    }

    async fn get_pending_affiliate_transactions(
        &self,
        ids: &[Uuid],
    ) -> BillingResult<Vec<AffiliateTransaction>> {
        Ok(self
            .affiliates
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t)
            .filter(|t| ids.contains(&t.id) && t.status == AffiliateStatus::Pending)
            .cloned()
            .collect())
    }

    async fn payout_destination(&self, user_id: &UserId) -> BillingResult<Option<String>> {
        Ok(self.destinations.lock().unwrap().get(user_id).cloned())
    }

    async fn mark_affiliate_paid(
        &self,
        id: Uuid,
        payout_id: &str,
        paid_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        self.check_writable()?;
        let mut affiliates = self.affiliates.lock().unwrap();
        match affiliates
            .iter_mut()
            .map(|(_, t)| t)
            .find(|t| t.id == id && t.status == AffiliateStatus::Pending)
        {
            Some(transaction) => {
                transaction.status = AffiliateStatus::Paid;
                transaction.payout_id = Some(payout_id.to_string());
                transaction.paid_at = Some(paid_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SettingsSource for InMemoryLedgerStore {
    async fn load_site_settings(&self) -> BillingResult<SiteSettings> {
        Ok(self.settings.lock().unwrap().clone())
    }
}
