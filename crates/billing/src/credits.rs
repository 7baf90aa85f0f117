//! Credit settlement rules

use std::sync::Arc;

use storefront_shared::{UserId, UserRole};

use crate::error::{BillingError, BillingResult};
use crate::settings::SettingsCache;
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// First purchase: balance is replaced, role follows the product
    InitialGrant,
    /// Subscription renewal: balance rolls over or is replaced
    Renewal,
    /// Subscription ended: role drops to free, balance untouched
    Cancellation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub balance: i64,
    pub role: UserRole,
}

/// New balance and role for a user. Admins keep their role under every mode.
pub fn settle(
    current_balance: i64,
    current_role: &UserRole,
    granted_credits: i64,
    rollover: bool,
    mode: SettlementMode,
    role_name: &str,
) -> BillingResult<Settlement> {
    if granted_credits < 0 {
        return Err(BillingError::InvalidInput(format!(
            "granted credits must not be negative, got {}",
            granted_credits
        )));
    }

    let keep_or = |next: UserRole| {
        if current_role.is_admin() {
            UserRole::Admin
        } else {
            next
        }
    };

    let settlement = match mode {
        SettlementMode::InitialGrant => Settlement {
            balance: granted_credits,
            role: keep_or(UserRole::from(role_name)),
        },
        SettlementMode::Renewal => Settlement {
            balance: if rollover {
                current_balance.max(0).saturating_add(granted_credits)
            } else {
                granted_credits
            },
            role: current_role.clone(),
        },
        SettlementMode::Cancellation => Settlement {
            balance: current_balance.max(0),
            role: keep_or(UserRole::Free),
        },
    };

    Ok(settlement)
}

/// One-time trial credit grant
pub struct TrialCredits {
    store: Arc<dyn LedgerStore>,
    settings: Arc<SettingsCache>,
}

impl TrialCredits {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<SettingsCache>) -> Self {
        Self { store, settings }
    }

    /// Grant the configured trial credits once. Returns the new balance.
    pub async fn claim(&self, user_id: &UserId) -> BillingResult<i64> {
        let settings = self.settings.get().await?;
        if !settings.trial_credits_enabled || settings.trial_credits <= 0 {
            return Err(BillingError::InvalidInput(
                "trial credits are not enabled".to_string(),
            ));
        }

        if self.store.get_user(user_id).await?.is_none() {
            return Err(BillingError::UserNotFound(user_id.to_string()));
        }

        match self
            .store
            .claim_trial_credits(user_id, settings.trial_credits)
            .await?
        {
            Some(balance) => {
                tracing::info!(
                    user_id = %user_id,
                    granted = settings.trial_credits,
                    balance = balance,
                    "Trial credits claimed"
                );
                Ok(balance)
            }
            None => Err(BillingError::InvalidInput(
                "trial credits already claimed".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(name: &str) -> UserRole {
        UserRole::Tier(name.into())
    }

    #[test]
    fn test_initial_grant_replaces_balance_and_sets_role() {
        let s = settle(40, &UserRole::Free, 500, false, SettlementMode::InitialGrant, "Pro").unwrap();
        assert_eq!(s.balance, 500);
        assert_eq!(s.role, tier("Pro"));
    }

    #[test]
    fn test_renewal_rollover_adds() {
        let s = settle(40, &tier("Pro"), 500, true, SettlementMode::Renewal, "Pro").unwrap();
        assert_eq!(s.balance, 540);
        assert_eq!(s.role, tier("Pro"));
    }

    #[test]
    fn test_renewal_without_rollover_replaces() {
        let s = settle(40, &tier("Pro"), 500, false, SettlementMode::Renewal, "Pro").unwrap();
        assert_eq!(s.balance, 500);
    }

    #[test]
    fn test_cancellation_downgrades_but_keeps_balance() {
        let s = settle(40, &tier("Pro"), 0, false, SettlementMode::Cancellation, "Pro").unwrap();
        assert_eq!(s.balance, 40);
        assert_eq!(s.role, UserRole::Free);
    }

    #[test]
    fn test_admin_role_is_never_overwritten() {
        for mode in [
            SettlementMode::InitialGrant,
            SettlementMode::Renewal,
            SettlementMode::Cancellation,
        ] {
            let s = settle(10, &UserRole::Admin, 100, true, mode, "Pro").unwrap();
            assert_eq!(s.role, UserRole::Admin, "mode {:?}", mode);
        }
    }

    #[test]
    fn test_negative_grant_is_rejected() {
        let err = settle(10, &UserRole::Free, -5, false, SettlementMode::Renewal, "Pro").unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }
}
