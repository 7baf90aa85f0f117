//! Postgres-backed ledger store

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use storefront_shared::{
    AffiliateStatus, AffiliateTransaction, NewAffiliateCommission, TransactionRecord, UserAccount,
    UserId, UserRole,
};

use crate::error::{BillingError, BillingResult};
use crate::store::{LedgerSnapshot, LedgerStore, SettingsSource, SiteSettings};

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: String,
    user_role: String,
    credits: i64,
    trial_credits_claimed: bool,
    stripe_id: Json<Vec<TransactionRecord>>,
    ledger_version: i64,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            user_id: UserId(row.user_id),
            role: UserRole::from(row.user_role),
            credits: row.credits,
            trial_credits_claimed: row.trial_credits_claimed,
            transactions: row.stripe_id.0,
            ledger_version: row.ledger_version,
        }
    }
}

#[derive(Debug, FromRow)]
struct AffiliateRow {
    id: Uuid,
    created_at: OffsetDateTime,
    amount_cents: i64,
    status: String,
    customer_id: Option<String>,
    customer_email: Option<String>,
    commission_cents: i64,
    affiliate_user_id: String,
    payout_id: Option<String>,
    paid_at: Option<OffsetDateTime>,
}

impl TryFrom<AffiliateRow> for AffiliateTransaction {
    type Error = BillingError;

    fn try_from(row: AffiliateRow) -> Result<Self, Self::Error> {
        let status = AffiliateStatus::parse(&row.status).ok_or_else(|| {
            BillingError::Database(format!(
                "affiliate transaction {} has unknown status {}",
                row.id, row.status
            ))
        })?;

        Ok(AffiliateTransaction {
            id: row.id,
            created_at: row.created_at,
            amount_cents: row.amount_cents,
            status,
            customer_id: row.customer_id,
            customer_email: row.customer_email,
            commission_cents: row.commission_cents,
            affiliate_user_id: UserId(row.affiliate_user_id),
            payout_id: row.payout_id,
            paid_at: row.paid_at,
        })
    }
}

/// Ledger store over the `users`, `affiliate_transactions` and
/// `site_settings` tables
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn missing(user_id: &UserId) -> BillingError {
        BillingError::UserNotFound(user_id.to_string())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_user(&self, user_id: &UserId) -> BillingResult<Option<UserAccount>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, user_role, credits, trial_credits_claimed, stripe_id, ledger_version
             FROM users WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserAccount::from))
    }

    async fn get_ledger(&self, user_id: &UserId) -> BillingResult<LedgerSnapshot> {
        let row: Option<(Json<Vec<TransactionRecord>>, i64)> =
            sqlx::query_as("SELECT stripe_id, ledger_version FROM users WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let (records, version) = row.ok_or_else(|| Self::missing(user_id))?;
        Ok(LedgerSnapshot {
            records: records.0,
            version,
        })
    }

    async fn replace_ledger(
        &self,
        user_id: &UserId,
        records: &[TransactionRecord],
        expected_version: i64,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET stripe_id = $1, ledger_version = ledger_version + 1, updated_at = NOW()
            WHERE user_id = $2 AND ledger_version = $3
            "#,
        )
        .bind(Json(records))
        .bind(user_id.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_credits_and_role(
        &self,
        user_id: &UserId,
        credits: i64,
        role: &UserRole,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE users SET credits = $1, user_role = $2, updated_at = NOW() WHERE user_id = $3",
        )
        .bind(credits)
        .bind(role.as_str())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::missing(user_id));
        }
        Ok(())
    }

    async fn set_role(&self, user_id: &UserId, role: &UserRole) -> BillingResult<()> {
        let result =
            sqlx::query("UPDATE users SET user_role = $1, updated_at = NOW() WHERE user_id = $2")
                .bind(role.as_str())
                .bind(user_id.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Self::missing(user_id));
        }
        Ok(())
    }

    async fn claim_trial_credits(
        &self,
        user_id: &UserId,
        amount: i64,
    ) -> BillingResult<Option<i64>> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = credits + $1, trial_credits_claimed = TRUE, updated_at = NOW()
            WHERE user_id = $2 AND trial_credits_claimed = FALSE
            RETURNING credits
            "#,
        )
        .bind(amount)
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn record_affiliate_commission(
        &self,
        commission: &NewAffiliateCommission,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO affiliate_transactions
                (id, amount_cents, status, customer_id, customer_email,
                 commission_cents, affiliate_user_id, source_reference)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7)
            ON CONFLICT (source_reference) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(commission.amount_cents)
        .bind(commission.customer_id.as_deref())
        .bind(commission.customer_email.as_deref())
        .bind(commission.commission_cents)
        .bind(commission.affiliate_user_id.as_str())
        .bind(&commission.source_reference)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_pending_affiliate_transactions(
        &self,
        ids: &[Uuid],
    ) -> BillingResult<Vec<AffiliateTransaction>> {
        let rows: Vec<AffiliateRow> = sqlx::query_as(
            r#"
            SELECT id, created_at, amount_cents, status, customer_id, customer_email,
                   commission_cents, affiliate_user_id, payout_id, paid_at
            FROM affiliate_transactions
            WHERE id = ANY($1) AND status = 'pending'
            ORDER BY created_at
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AffiliateTransaction::try_from).collect()
    }

    async fn payout_destination(&self, user_id: &UserId) -> BillingResult<Option<String>> {
        let destination: Option<Option<String>> =
            sqlx::query_scalar("SELECT payout_account_id FROM users WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(destination.flatten().filter(|d| !d.is_empty()))
    }

    async fn mark_affiliate_paid(
        &self,
        id: Uuid,
        payout_id: &str,
        paid_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE affiliate_transactions
            SET status = 'paid', payout_id = $1, paid_at = $2
            WHERE id = $3 AND status = 'pending'
            "#,
        )
        .bind(payout_id)
        .bind(paid_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SettingsSource for PgLedgerStore {
    async fn load_site_settings(&self) -> BillingResult<SiteSettings> {
        let row: Option<(String, Option<String>, i64, bool, i32)> = sqlx::query_as(
            r#"
            SELECT site_name, webhook_secret, trial_credits, trial_credits_enabled,
                   affiliate_commission_percent
            FROM site_settings WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(
                |(site_name, webhook_secret, trial_credits, trial_credits_enabled, percent)| {
                    SiteSettings {
                        site_name,
                        webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
                        trial_credits,
                        trial_credits_enabled,
                        affiliate_commission_percent: i64::from(percent),
                    }
                },
            )
            .unwrap_or_default())
    }
}
