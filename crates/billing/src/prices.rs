//! Price set reconciliation
//!
//! Brings a product's prices at the provider in line with a desired list.
//! Prices are immutable once created: a changed amount, mode, interval or
//! trial produces a new price and retires the old one.
//!
//! Phases run strictly in order:
//! 1. archive prices that are no longer wanted (concurrently)
//! 2. reactivate requested prices
//! 3. resolve each desired entry (reuse, create, deactivate)
//! 4. move the product's default pointer
//! 5. retire replaced prices and the previous default
//!
//! All validation happens in [`PriceReconciler::prepare`] before the first
//! mutation. A re-run with the same input finds every price already in place
//! and performs no mutations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingInterval, NewPrice, PaymentMode, ProductPatch, ProviderGateway, RemotePrice,
    RemoteProduct, TaxBehavior,
};

/// One entry of the desired price list
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredPrice {
    /// Existing price to keep; absent for a new price
    #[serde(default)]
    pub id: Option<String>,
    /// Minor currency units
    pub amount: i64,
    pub payment_type: PaymentMode,
    #[serde(default)]
    pub billing_period: Option<BillingInterval>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub has_trial: Option<bool>,
    #[serde(default)]
    pub trial_days: Option<u32>,
}

impl DesiredPrice {
    fn named_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    /// Normalized commercial terms, rejecting contradictory input
    pub fn terms(&self) -> BillingResult<PriceTerms> {
        if self.amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "price amount must be positive, got {}",
                self.amount
            )));
        }

        let wants_trial = self.has_trial.unwrap_or(false);
        match self.payment_type {
            PaymentMode::OneTime => {
                if wants_trial {
                    return Err(BillingError::InvalidInput(
                        "trials are only available on recurring prices".to_string(),
                    ));
                }
                Ok(PriceTerms {
                    amount: self.amount,
                    mode: PaymentMode::OneTime,
                    interval: None,
                    trial_days: None,
                })
            }
            PaymentMode::Recurring => {
                let interval = self.billing_period.ok_or_else(|| {
                    BillingError::InvalidInput(
                        "recurring prices need a billing period".to_string(),
                    )
                })?;
                let trial_days = if wants_trial {
                    match self.trial_days {
                        Some(days) if days > 0 => Some(days),
                        _ => {
                            return Err(BillingError::InvalidInput(
                                "trial length must be at least one day".to_string(),
                            ))
                        }
                    }
                } else {
                    None
                };
                Ok(PriceTerms {
                    amount: self.amount,
                    mode: PaymentMode::Recurring,
                    interval: Some(interval),
                    trial_days,
                })
            }
        }
    }
}

/// Compared fields of a price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTerms {
    pub amount: i64,
    pub mode: PaymentMode,
    pub interval: Option<BillingInterval>,
    pub trial_days: Option<u32>,
}

impl PriceTerms {
    pub fn matches(&self, price: &RemotePrice) -> bool {
        price.unit_amount == self.amount
            && price.mode == self.mode
            && price.interval == self.interval
            && price.trial_days == self.trial_days
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub product_id: String,
    pub prices: Vec<DesiredPrice>,
    #[serde(default)]
    pub prices_to_reactivate: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum PriceOutcome {
    /// Existing price kept as is
    Reused,
    Created,
    /// New price created in place of one whose terms changed
    Replaced { previous: String },
    Reactivated,
    Deactivated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPrice {
    pub price: RemotePrice,
    pub outcome: PriceOutcome,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    /// One entry per desired price, in request order
    pub prices: Vec<ResolvedPrice>,
    pub default_price: Option<String>,
    /// Prices archived by this run
    pub archived: Vec<String>,
}

// =============================================================================
// Planning
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// Existing price with unchanged terms
    Keep { id: String },
    /// A price that already carries the desired terms
    Adopt { id: String },
    Create { replaces: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedEntry {
    terms: PriceTerms,
    target: Target,
    /// Price this entry supersedes, when its terms changed
    replaces: Option<String>,
    /// Caller wants the price switched off
    inactive: bool,
    /// Switch-off call made while resolving this entry
    deactivate_now: bool,
    /// Reactivation requested through the entry's own `active` flag
    reactivate_now: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Plan {
    entries: Vec<PlannedEntry>,
    archive_now: Vec<String>,
    reactivate: Vec<String>,
    retire_after_default: Vec<String>,
    default_index: Option<usize>,
}

fn invalid(message: impl Into<String>) -> BillingError {
    BillingError::InvalidInput(message.into())
}

/// Validate the request against current provider state and decide every
/// mutation up front
fn plan(
    request: &ReconcileRequest,
    current: &[RemotePrice],
    current_default: Option<&str>,
) -> BillingResult<Plan> {
    let terms = request
        .prices
        .iter()
        .map(DesiredPrice::terms)
        .collect::<BillingResult<Vec<_>>>()?;

    let by_id: HashMap<&str, &RemotePrice> =
        current.iter().map(|p| (p.id.as_str(), p)).collect();

    // A form that sent identifier fields but no usable identifiers would
    // otherwise archive every price of the product
    let supplied_ids = request.prices.iter().filter(|p| p.id.is_some()).count();
    let named: Vec<&str> = request
        .prices
        .iter()
        .filter_map(DesiredPrice::named_id)
        .collect();
    if supplied_ids > 0 && named.is_empty() {
        return Err(invalid("form data missing price identifiers"));
    }

    let mut referenced: HashSet<&str> = HashSet::new();
    for id in &named {
        if !by_id.contains_key(id) {
            return Err(invalid(format!(
                "price {} does not belong to product {}",
                id, request.product_id
            )));
        }
        if !referenced.insert(id) {
            return Err(invalid(format!("price {} is listed more than once", id)));
        }
    }

    let mut reactivate: Vec<String> = Vec::new();
    for id in &request.prices_to_reactivate {
        let price = by_id.get(id.as_str()).ok_or_else(|| {
            invalid(format!(
                "price {} to reactivate does not belong to product {}",
                id, request.product_id
            ))
        })?;
        referenced.insert(id.as_str());
        if !price.active && !reactivate.contains(id) {
            reactivate.push(id.clone());
        }
    }

    let flagged: Vec<usize> = request
        .prices
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_default)
        .map(|(i, _)| i)
        .collect();
    if flagged.len() > 1 {
        return Err(invalid("only one price can be the default"));
    }

    // Unreferenced prices with matching terms are taken over instead of
    // creating duplicates. Inactive matches only serve inactive entries and
    // the current default is never taken over to be switched off.
    let mut claimed: HashSet<String> = HashSet::new();
    let mut adopt = |terms: &PriceTerms, inactive: bool| -> Option<(String, bool)> {
        let found = current.iter().find(|p| {
            (p.active || inactive)
                && !(inactive && Some(p.id.as_str()) == current_default)
                && !referenced.contains(p.id.as_str())
                && !claimed.contains(&p.id)
                && terms.matches(p)
        })?;
        claimed.insert(found.id.clone());
        Some((found.id.clone(), found.active))
    };

    let mut retire_after_default = Vec::new();
    let mut entries = Vec::with_capacity(request.prices.len());
    for (desired, terms) in request.prices.iter().zip(terms) {
        let inactive = desired.active == Some(false);
        let existing = desired.named_id().and_then(|id| by_id.get(id).copied());

        let entry = match existing {
            Some(existing) if terms.matches(existing) => {
                let active_after = existing.active || reactivate.contains(&existing.id);
                let reactivate_now = desired.active == Some(true) && !active_after;
                let mut deactivate_now = inactive && active_after;
                if deactivate_now && Some(existing.id.as_str()) == current_default {
                    retire_after_default.push(existing.id.clone());
                    deactivate_now = false;
                }
                PlannedEntry {
                    target: Target::Keep {
                        id: existing.id.clone(),
                    },
                    replaces: None,
                    inactive,
                    deactivate_now,
                    reactivate_now,
                    terms,
                }
            }
            _ => {
                let replaces = existing.map(|p| p.id.clone());
                let (target, deactivate_now) = match adopt(&terms, inactive) {
                    Some((id, active)) => (Target::Adopt { id }, inactive && active),
                    None => (
                        Target::Create {
                            replaces: replaces.clone(),
                        },
                        inactive,
                    ),
                };
                PlannedEntry {
                    target,
                    replaces,
                    inactive,
                    deactivate_now,
                    reactivate_now: false,
                    terms,
                }
            }
        };
        entries.push(entry);
    }

    let kept: HashSet<&str> = entries
        .iter()
        .filter_map(|e| match &e.target {
            Target::Keep { id } | Target::Adopt { id } => Some(id.as_str()),
            Target::Create { .. } => None,
        })
        .chain(request.prices_to_reactivate.iter().map(String::as_str))
        .collect();
    let replaced: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.replaces.as_deref())
        .collect();

    let mut archive_now = Vec::new();
    for price in current.iter().filter(|p| p.active) {
        let id = price.id.as_str();
        if kept.contains(id) {
            continue;
        }
        if replaced.contains(id) || Some(id) == current_default {
            retire_after_default.push(price.id.clone());
        } else {
            archive_now.push(price.id.clone());
        }
    }

    let default_index = match flagged.first() {
        Some(&i) => Some(i),
        None => entries
            .iter()
            .position(|e| e.replaces.is_some() && e.replaces.as_deref() == current_default),
    };

    if let Some(default_id) = current_default {
        if default_index.is_none() && retire_after_default.iter().any(|id| id == default_id) {
            return Err(invalid(
                "the current default price would be archived; flag a new default",
            ));
        }
    }

    if let Some(i) = default_index {
        let entry = &entries[i];
        if entry.inactive {
            return Err(invalid("the default price cannot be inactive"));
        }
        if let Target::Keep { id } = &entry.target {
            let active_after = by_id.get(id.as_str()).map(|p| p.active).unwrap_or(false)
                || reactivate.contains(id)
                || entry.reactivate_now;
            if !active_after {
                return Err(invalid(format!(
                    "price {} is archived and cannot become the default",
                    id
                )));
            }
        }
    }

    Ok(Plan {
        entries,
        archive_now,
        reactivate,
        retire_after_default,
        default_index,
    })
}

// =============================================================================
// Execution
// =============================================================================

/// A request that passed validation, bound to the provider state it was
/// planned against
#[derive(Debug, Clone)]
pub struct PreparedReconcile {
    request: ReconcileRequest,
    product: RemoteProduct,
    current: Vec<RemotePrice>,
    plan: Plan,
}

impl PreparedReconcile {
    /// Product as read while planning
    pub fn product(&self) -> &RemoteProduct {
        &self.product
    }
}

pub struct PriceReconciler {
    gateway: Arc<dyn ProviderGateway>,
}

impl PriceReconciler {
    pub fn new(gateway: Arc<dyn ProviderGateway>) -> Self {
        Self { gateway }
    }

    pub async fn reconcile(&self, request: &ReconcileRequest) -> BillingResult<ReconcileOutcome> {
        let prepared = self.prepare(request).await?;
        self.execute(prepared).await
    }

    /// Read the product and its prices and plan every change. Only reads
    /// reach the provider.
    pub async fn prepare(&self, request: &ReconcileRequest) -> BillingResult<PreparedReconcile> {
        // Terms are checked before anything touches the provider
        for desired in &request.prices {
            desired.terms()?;
        }

        let product = self.gateway.retrieve_product(&request.product_id).await?;
        let current = self.gateway.list_prices(&request.product_id).await?;
        let plan = plan(request, &current, product.default_price.as_deref())?;

        Ok(PreparedReconcile {
            request: request.clone(),
            product,
            current,
            plan,
        })
    }

    pub async fn execute(&self, prepared: PreparedReconcile) -> BillingResult<ReconcileOutcome> {
        let PreparedReconcile {
            request,
            product,
            current,
            plan,
        } = prepared;
        let by_id: HashMap<&str, &RemotePrice> =
            current.iter().map(|p| (p.id.as_str(), p)).collect();

        tracing::info!(
            product_id = %request.product_id,
            desired = plan.entries.len(),
            archive = plan.archive_now.len(),
            reactivate = plan.reactivate.len(),
            retire = plan.retire_after_default.len(),
            "Reconciling prices"
        );

        let mut archived = self.archive_all(&plan.archive_now).await?;

        for id in &plan.reactivate {
            self.gateway.set_price_active(id, true).await?;
            tracing::info!(price_id = %id, "Reactivated price");
        }

        let tax_behavior = current
            .iter()
            .find(|p| p.active)
            .map(|p| p.tax_behavior)
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(plan.entries.len());
        for (index, entry) in plan.entries.iter().enumerate() {
            let price = self
                .resolve_entry(&request.product_id, entry, &by_id, &plan, tax_behavior)
                .await?;
            resolved.push(ResolvedPrice {
                is_default: plan.default_index == Some(index),
                ..price
            });
        }

        let default_price = match plan.default_index {
            Some(index) => {
                let target = resolved[index].price.id.clone();
                if product.default_price.as_deref() != Some(target.as_str()) {
                    self.gateway
                        .update_product(&request.product_id, &ProductPatch::default_price(&target))
                        .await?;
                    tracing::info!(
                        product_id = %request.product_id,
                        previous = ?product.default_price,
                        default_price = %target,
                        "Moved default price"
                    );
                }
                Some(target)
            }
            None => product.default_price.clone(),
        };

        archived.extend(self.archive_all(&plan.retire_after_default).await?);

        Ok(ReconcileOutcome {
            prices: resolved,
            default_price,
            archived,
        })
    }

    async fn resolve_entry(
        &self,
        product_id: &str,
        entry: &PlannedEntry,
        current: &HashMap<&str, &RemotePrice>,
        plan: &Plan,
        tax_behavior: TaxBehavior,
    ) -> BillingResult<ResolvedPrice> {
        let existing = |id: &str| -> BillingResult<RemotePrice> {
            current
                .get(id)
                .map(|p| (*p).clone())
                .ok_or_else(|| invalid(format!("price {} is not listed for the product", id)))
        };

        let (mut price, mut outcome) = match &entry.target {
            Target::Keep { id } => {
                if entry.reactivate_now {
                    let price = self.gateway.set_price_active(id, true).await?;
                    tracing::info!(price_id = %id, "Reactivated price");
                    (price, PriceOutcome::Reactivated)
                } else if plan.reactivate.contains(id) {
                    let mut price = existing(id)?;
                    price.active = true;
                    (price, PriceOutcome::Reactivated)
                } else {
                    (existing(id)?, PriceOutcome::Reused)
                }
            }
            Target::Adopt { id } => (existing(id)?, PriceOutcome::Reused),
            Target::Create { replaces } => {
                let created = self
                    .gateway
                    .create_price(&NewPrice {
                        product_id: product_id.to_string(),
                        unit_amount: entry.terms.amount,
                        mode: entry.terms.mode,
                        interval: entry.terms.interval,
                        trial_days: entry.terms.trial_days,
                        tax_behavior: replaces
                            .as_deref()
                            .and_then(|id| current.get(id))
                            .map(|p| p.tax_behavior)
                            .unwrap_or(tax_behavior),
                    })
                    .await?;
                tracing::info!(
                    price_id = %created.id,
                    replaces = ?replaces,
                    unit_amount = created.unit_amount,
                    "Created price"
                );
                let outcome = match replaces {
                    Some(previous) => PriceOutcome::Replaced {
                        previous: previous.clone(),
                    },
                    None => PriceOutcome::Created,
                };
                (created, outcome)
            }
        };

        if entry.deactivate_now {
            price = self.gateway.set_price_active(&price.id, false).await?;
            tracing::info!(price_id = %price.id, "Deactivated price");
        }
        if entry.inactive {
            // Deferred switch-offs happen after the default pointer moves
            price.active = false;
            outcome = PriceOutcome::Deactivated;
        }

        Ok(ResolvedPrice {
            price,
            outcome,
            is_default: false,
        })
    }

    /// Archive prices concurrently; any failure is reported with the ids that
    /// did go through
    async fn archive_all(&self, ids: &[String]) -> BillingResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(ids.iter().map(|id| async move {
            (id.clone(), self.gateway.set_price_active(id, false).await)
        }))
        .await;

        let mut archived = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(_) => {
                    tracing::info!(price_id = %id, "Archived price");
                    archived.push(id);
                }
                Err(e) => {
                    tracing::error!(price_id = %id, error = %e, "Failed to archive price");
                    failed.push((id, e.to_string()));
                }
            }
        }

        if failed.is_empty() {
            Ok(archived)
        } else {
            Err(BillingError::PartialArchive { archived, failed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, amount: i64, active: bool) -> RemotePrice {
        RemotePrice {
            id: id.into(),
            product_id: "prod_1".into(),
            unit_amount: amount,
            currency: "usd".into(),
            tax_behavior: TaxBehavior::Exclusive,
            mode: PaymentMode::Recurring,
            interval: Some(BillingInterval::Month),
            trial_days: None,
            active,
        }
    }

    fn monthly(id: Option<&str>, amount: i64, is_default: bool) -> DesiredPrice {
        DesiredPrice {
            id: id.map(str::to_string),
            amount,
            payment_type: PaymentMode::Recurring,
            billing_period: Some(BillingInterval::Month),
            is_default,
            active: None,
            has_trial: None,
            trial_days: None,
        }
    }

    fn request(prices: Vec<DesiredPrice>) -> ReconcileRequest {
        ReconcileRequest {
            product_id: "prod_1".into(),
            prices,
            prices_to_reactivate: vec![],
        }
    }

    #[test]
    fn test_terms_reject_contradictions() {
        assert!(matches!(
            monthly(None, 0, false).terms(),
            Err(BillingError::InvalidAmount(_))
        ));

        let mut no_period = monthly(None, 100, false);
        no_period.billing_period = None;
        assert!(no_period.terms().is_err());

        let mut one_time_trial = monthly(None, 100, false);
        one_time_trial.payment_type = PaymentMode::OneTime;
        one_time_trial.has_trial = Some(true);
        one_time_trial.trial_days = Some(7);
        assert!(one_time_trial.terms().is_err());

        let mut zero_trial = monthly(None, 100, false);
        zero_trial.has_trial = Some(true);
        zero_trial.trial_days = Some(0);
        assert!(zero_trial.terms().is_err());
    }

    #[test]
    fn test_one_time_terms_drop_interval() {
        let mut entry = monthly(None, 500, false);
        entry.payment_type = PaymentMode::OneTime;
        let terms = entry.terms().unwrap();
        assert_eq!(terms.interval, None);
    }

    #[test]
    fn test_plan_archives_prices_missing_from_request() {
        let current = vec![remote("price_a", 1000, true), remote("price_b", 2000, true)];
        let plan = plan(
            &request(vec![monthly(Some("price_a"), 1000, true)]),
            &current,
            Some("price_a"),
        )
        .unwrap();

        assert_eq!(plan.archive_now, vec!["price_b".to_string()]);
        assert!(plan.retire_after_default.is_empty());
        assert_eq!(
            plan.entries[0].target,
            Target::Keep {
                id: "price_a".into()
            }
        );
    }

    #[test]
    fn test_plan_rejects_blank_identifiers() {
        let current = vec![remote("price_a", 1000, true)];
        let err = plan(
            &request(vec![monthly(Some(""), 1000, true)]),
            &current,
            Some("price_a"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing price identifiers"));
    }

    #[test]
    fn test_plan_rejects_unknown_and_duplicate_ids() {
        let current = vec![remote("price_a", 1000, true)];
        assert!(plan(
            &request(vec![monthly(Some("price_zzz"), 1000, true)]),
            &current,
            None
        )
        .is_err());
        assert!(plan(
            &request(vec![
                monthly(Some("price_a"), 1000, true),
                monthly(Some("price_a"), 1000, false),
            ]),
            &current,
            None
        )
        .is_err());

        let mut req = request(vec![monthly(Some("price_a"), 1000, true)]);
        req.prices_to_reactivate = vec!["price_nope".into()];
        assert!(plan(&req, &current, None).is_err());
    }

    #[test]
    fn test_plan_rejects_two_defaults() {
        let err = plan(
            &request(vec![monthly(None, 1000, true), monthly(None, 2000, true)]),
            &[],
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_plan_defers_archiving_current_default() {
        let current = vec![remote("price_a", 1000, true)];
        let plan = plan(&request(vec![monthly(None, 3000, true)]), &current, Some("price_a")).unwrap();

        assert!(plan.archive_now.is_empty());
        assert_eq!(plan.retire_after_default, vec!["price_a".to_string()]);
        assert_eq!(plan.default_index, Some(0));
    }

    #[test]
    fn test_plan_requires_new_default_when_default_leaves() {
        let current = vec![remote("price_a", 1000, true)];
        let err = plan(&request(vec![monthly(None, 3000, false)]), &current, Some("price_a"))
            .unwrap_err();
        assert!(err.to_string().contains("flag a new default"));
    }

    #[test]
    fn test_changed_default_is_inherited_by_replacement() {
        let current = vec![remote("price_a", 1000, true)];
        let plan = plan(
            &request(vec![monthly(Some("price_a"), 1500, false)]),
            &current,
            Some("price_a"),
        )
        .unwrap();

        assert_eq!(plan.default_index, Some(0));
        assert_eq!(
            plan.entries[0].target,
            Target::Create {
                replaces: Some("price_a".into())
            }
        );
        assert_eq!(plan.retire_after_default, vec!["price_a".to_string()]);
    }

    #[test]
    fn test_previous_replacement_is_adopted_on_rerun() {
        let current = vec![remote("price_a", 1000, false), remote("price_b", 1500, true)];
        let plan = plan(
            &request(vec![monthly(Some("price_a"), 1500, true)]),
            &current,
            Some("price_b"),
        )
        .unwrap();

        assert_eq!(
            plan.entries[0].target,
            Target::Adopt {
                id: "price_b".into()
            }
        );
        assert!(plan.archive_now.is_empty());
        assert!(plan.retire_after_default.is_empty());
    }

    #[test]
    fn test_archived_price_cannot_be_default_without_reactivation() {
        let current = vec![remote("price_a", 1000, false), remote("price_b", 2000, true)];
        let req = request(vec![monthly(Some("price_a"), 1000, true)]);
        assert!(plan(&req, &current, Some("price_b")).is_err());

        let mut req = req;
        req.prices_to_reactivate = vec!["price_a".into()];
        let plan = plan(&req, &current, Some("price_b")).unwrap();
        assert_eq!(plan.reactivate, vec!["price_a".to_string()]);
        assert_eq!(plan.retire_after_default, vec!["price_b".to_string()]);
    }

    #[test]
    fn test_desired_price_reads_camel_case_form() {
        let parsed: DesiredPrice = serde_json::from_value(serde_json::json!({
            "id": "price_1",
            "amount": 1500,
            "paymentType": "recurring",
            "billingPeriod": "month",
            "isDefault": true,
            "hasTrial": true,
            "trialDays": 14
        }))
        .unwrap();
        assert_eq!(parsed.trial_days, Some(14));
        assert!(parsed.is_default);
    }
}
