//! Affiliate payout batches
//!
//! One transfer per pending commission. Items are independent: a failed
//! transfer is reported for that item and never rolls back its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use storefront_shared::AffiliateTransaction;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{ProviderGateway, TransferRequest};
use crate::store::LedgerStore;

/// Default number of transfers in flight
pub const DEFAULT_PAYOUT_CONCURRENCY: usize = 5;
/// Upper bound on transfers in flight
pub const MAX_PAYOUT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutBatchRequest {
    pub transaction_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutItemStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutItemResult {
    pub transaction_id: Uuid,
    pub status: PayoutItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PayoutItemResult {
    fn success(transaction_id: Uuid, transfer_id: String) -> Self {
        Self {
            transaction_id,
            status: PayoutItemStatus::Success,
            transfer_id: Some(transfer_id),
            error: None,
        }
    }

    fn error(transaction_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            transaction_id,
            status: PayoutItemStatus::Error,
            transfer_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutBatchResult {
    pub message: String,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PayoutItemResult>,
}

pub struct PayoutProcessor {
    gateway: Arc<dyn ProviderGateway>,
    store: Arc<dyn LedgerStore>,
    concurrency: usize,
}

impl PayoutProcessor {
    pub fn new(gateway: Arc<dyn ProviderGateway>, store: Arc<dyn LedgerStore>) -> Self {
        Self::with_concurrency(gateway, store, DEFAULT_PAYOUT_CONCURRENCY)
    }

    pub fn with_concurrency(
        gateway: Arc<dyn ProviderGateway>,
        store: Arc<dyn LedgerStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            concurrency: concurrency.clamp(1, MAX_PAYOUT_CONCURRENCY),
        }
    }

    /// Pay every named commission that is still pending. Ids that are
    /// unknown or already paid are skipped without a result entry.
    pub async fn process_batch(&self, transaction_ids: &[Uuid]) -> BillingResult<PayoutBatchResult> {
        if transaction_ids.is_empty() {
            return Err(BillingError::InvalidInput(
                "no transaction ids given".to_string(),
            ));
        }

        let pending = self
            .store
            .get_pending_affiliate_transactions(transaction_ids)
            .await?;
        let skipped = transaction_ids.len().saturating_sub(pending.len());

        tracing::info!(
            requested = transaction_ids.len(),
            pending = pending.len(),
            skipped = skipped,
            "Processing payout batch"
        );

        // Destinations are resolved once per affiliate
        let mut destinations: HashMap<String, Result<Option<String>, String>> = HashMap::new();
        for item in &pending {
            let key = item.affiliate_user_id.to_string();
            if !destinations.contains_key(&key) {
                let destination = self
                    .store
                    .payout_destination(&item.affiliate_user_id)
                    .await
                    .map_err(|e| e.to_string());
                destinations.insert(key, destination);
            }
        }

        let results: Vec<PayoutItemResult> = stream::iter(pending)
            .map(|item| {
                let destination = destinations
                    .get(item.affiliate_user_id.as_str())
                    .cloned()
                    .unwrap_or(Ok(None));
                async move { self.pay(item, destination).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = results
            .iter()
            .filter(|r| r.status == PayoutItemStatus::Success)
            .count();
        let failed = results.len() - succeeded;

        tracing::info!(succeeded = succeeded, failed = failed, "Payout batch finished");

        Ok(PayoutBatchResult {
            message: format!(
                "Processed {} payouts: {} succeeded, {} failed",
                results.len(),
                succeeded,
                failed
            ),
            succeeded,
            failed,
            results,
        })
    }

    async fn pay(
        &self,
        item: AffiliateTransaction,
        destination: Result<Option<String>, String>,
    ) -> PayoutItemResult {
        let destination = match destination {
            Ok(destination) => destination,
            Err(e) => return PayoutItemResult::error(item.id, e),
        };
        let Some(destination) = destination else {
            tracing::warn!(
                transaction_id = %item.id,
                affiliate_user_id = %item.affiliate_user_id,
                "Affiliate has no payout destination"
            );
            return PayoutItemResult::error(item.id, "no connected payout destination");
        };

        if item.commission_cents <= 0 {
            return PayoutItemResult::error(item.id, "commission amount must be positive");
        }

        let transfer = TransferRequest {
            amount_cents: item.commission_cents,
            destination,
            idempotency_key: format!("payout-{}", item.id),
            metadata: HashMap::from([
                ("affiliate_transaction_id".to_string(), item.id.to_string()),
                (
                    "affiliate_user_id".to_string(),
                    item.affiliate_user_id.to_string(),
                ),
            ]),
        };

        let transfer = match self.gateway.create_transfer(&transfer).await {
            Ok(transfer) => transfer,
            Err(e) => {
                tracing::error!(transaction_id = %item.id, error = %e, "Payout transfer failed");
                return PayoutItemResult::error(item.id, e.to_string());
            }
        };

        match self
            .store
            .mark_affiliate_paid(item.id, &transfer.id, OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => {
                tracing::info!(
                    transaction_id = %item.id,
                    transfer_id = %transfer.id,
                    amount_cents = transfer.amount_cents,
                    "Payout completed"
                );
                PayoutItemResult::success(item.id, transfer.id)
            }
            Ok(false) => {
                tracing::warn!(
                    transaction_id = %item.id,
                    transfer_id = %transfer.id,
                    "Transaction was no longer pending when marking paid"
                );
                PayoutItemResult::success(item.id, transfer.id)
            }
            Err(e) => {
                // The transfer went out; resubmitting reuses its idempotency key
                tracing::error!(
                    transaction_id = %item.id,
                    transfer_id = %transfer.id,
                    error = %e,
                    "Transfer sent but marking paid failed"
                );
                PayoutItemResult {
                    transfer_id: Some(transfer.id),
                    ..PayoutItemResult::error(item.id, e.to_string())
                }
            }
        }
    }
}
