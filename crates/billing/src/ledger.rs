//! Per-user transaction ledger
//!
//! The collection is stored inline on the user row. Writes are
//! read-modify-write guarded by a version compare-and-swap; a lost race
//! re-reads and re-applies the change.

use std::sync::Arc;

use storefront_shared::{TransactionRecord, UserId};

use crate::error::{BillingError, BillingResult};
use crate::store::LedgerStore;

/// Attempts before a contended write gives up
pub const MAX_LEDGER_ATTEMPTS: usize = 3;

/// How the record entered the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Appended,
    Merged,
}

/// Apply one record to a collection in memory
pub fn apply_record(
    records: &mut Vec<TransactionRecord>,
    record: TransactionRecord,
    match_by_identifier: bool,
) -> UpsertOutcome {
    if match_by_identifier {
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.transaction_id == record.transaction_id)
        {
            existing.merge_from(record);
            return UpsertOutcome::Merged;
        }
    }
    records.push(record);
    UpsertOutcome::Appended
}

#[derive(Clone)]
pub struct TransactionLedger {
    store: Arc<dyn LedgerStore>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Merge (when `match_by_identifier`) or append `record` into the user's
    /// collection. A renewal whose purchase is missing is appended rather
    /// than dropped.
    pub async fn upsert(
        &self,
        user_id: &UserId,
        record: TransactionRecord,
        match_by_identifier: bool,
    ) -> BillingResult<UpsertOutcome> {
        for attempt in 1..=MAX_LEDGER_ATTEMPTS {
            let snapshot = self.store.get_ledger(user_id).await?;
            let mut records = snapshot.records;
            let outcome = apply_record(&mut records, record.clone(), match_by_identifier);

            if self
                .store
                .replace_ledger(user_id, &records, snapshot.version)
                .await?
            {
                tracing::debug!(
                    user_id = %user_id,
                    transaction_id = %record.transaction_id,
                    outcome = ?outcome,
                    "Transaction ledger updated"
                );
                return Ok(outcome);
            }

            tracing::warn!(
                user_id = %user_id,
                attempt = attempt,
                "Transaction ledger changed concurrently, retrying"
            );
        }

        Err(BillingError::ConcurrentModification(format!(
            "transaction ledger of user {} kept changing after {} attempts",
            user_id, MAX_LEDGER_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_shared::TransactionStatus;

    fn record(id: &str, price: &str) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id.into(),
            status: TransactionStatus::Active,
            event_id: Some(format!("evt_{}", price)),
            product_id: "prod_1".into(),
            product_name: "Pro".into(),
            price: price.into(),
            interval: "month".into(),
            last_payment_at: "2026-01-01T00:00:00Z".into(),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_matching_record_is_merged_in_place() {
        let mut records = vec![record("sub_1", "10.00"), record("pi_9", "5.00")];
        let outcome = apply_record(&mut records, record("sub_1", "15.00"), true);

        assert_eq!(outcome, UpsertOutcome::Merged);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].price, "15.00");
    }

    #[test]
    fn test_unmatched_record_is_appended() {
        let mut records = vec![record("sub_1", "10.00")];
        let outcome = apply_record(&mut records, record("sub_2", "10.00"), true);

        assert_eq!(outcome, UpsertOutcome::Appended);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_append_mode_never_merges() {
        let mut records = vec![record("sub_1", "10.00")];
        apply_record(&mut records, record("sub_1", "10.00"), false);
        assert_eq!(records.len(), 2);
    }
}
