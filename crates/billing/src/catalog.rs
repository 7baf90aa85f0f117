//! Product create and update flows

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    NewPrice, ProductDraft, ProductPatch, ProviderGateway, RemotePrice, RemoteProduct,
    TaxBehavior, CREDITS_METADATA_KEY, CREDITS_ROLLOVER_METADATA_KEY, FEATURE_METADATA_PREFIX,
    ROLE_METADATA_KEY,
};
use crate::prices::{DesiredPrice, PriceReconciler, ReconcileOutcome, ReconcileRequest};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[serde(flatten)]
    pub product: ProductDraft,
    #[serde(default)]
    pub prices: Vec<DesiredPrice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub credits_rollover: Option<bool>,
    /// Empty string clears the role
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub prices: Vec<DesiredPrice>,
    #[serde(default)]
    pub prices_to_reactivate: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedProduct {
    pub product: RemoteProduct,
    pub prices: Vec<RemotePrice>,
    pub default_price: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatedProduct {
    pub product: RemoteProduct,
    pub reconcile: ReconcileOutcome,
}

pub struct ProductCatalog {
    gateway: Arc<dyn ProviderGateway>,
    reconciler: PriceReconciler,
}

impl ProductCatalog {
    pub fn new(gateway: Arc<dyn ProviderGateway>) -> Self {
        Self {
            reconciler: PriceReconciler::new(gateway.clone()),
            gateway,
        }
    }

    pub fn reconciler(&self) -> &PriceReconciler {
        &self.reconciler
    }

    /// Create a product with its prices. If a price cannot be created the
    /// product is archived again and the error returned.
    pub async fn create_product(&self, request: &CreateProductRequest) -> BillingResult<CreatedProduct> {
        request.product.validate()?;

        let mut terms = Vec::with_capacity(request.prices.len());
        for desired in &request.prices {
            if desired.id.as_deref().is_some_and(|id| !id.trim().is_empty()) {
                return Err(BillingError::InvalidInput(
                    "a new product cannot reference existing prices".to_string(),
                ));
            }
            if desired.is_default && desired.active == Some(false) {
                return Err(BillingError::InvalidInput(
                    "the default price cannot be inactive".to_string(),
                ));
            }
            terms.push(desired.terms()?);
        }

        let flagged: Vec<usize> = request
            .prices
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_default)
            .map(|(i, _)| i)
            .collect();
        if flagged.len() > 1 {
            return Err(BillingError::InvalidInput(
                "only one price can be the default".to_string(),
            ));
        }
        let default_index = flagged.first().copied().or_else(|| {
            request
                .prices
                .iter()
                .position(|p| p.active != Some(false))
        });

        let product = self.gateway.create_product(&request.product).await?;

        let mut prices = Vec::with_capacity(terms.len());
        for (desired, terms) in request.prices.iter().zip(terms) {
            let created = self
                .gateway
                .create_price(&NewPrice {
                    product_id: product.id.clone(),
                    unit_amount: terms.amount,
                    mode: terms.mode,
                    interval: terms.interval,
                    trial_days: terms.trial_days,
                    tax_behavior: TaxBehavior::default(),
                })
                .await;

            let created = match created {
                Ok(price) if desired.active == Some(false) => {
                    self.gateway.set_price_active(&price.id, false).await
                }
                other => other,
            };

            match created {
                Ok(price) => prices.push(price),
                Err(e) => {
                    self.compensate(&product.id).await;
                    return Err(e);
                }
            }
        }

        let default_price = default_index.and_then(|i| prices.get(i)).map(|p| p.id.clone());
        let product = match &default_price {
            Some(price_id) => {
                match self
                    .gateway
                    .update_product(&product.id, &ProductPatch::default_price(price_id))
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        self.compensate(&product.id).await;
                        return Err(e);
                    }
                }
            }
            None => product,
        };

        tracing::info!(
            product_id = %product.id,
            prices = prices.len(),
            default_price = ?default_price,
            "Product created"
        );

        Ok(CreatedProduct {
            product,
            prices,
            default_price,
        })
    }

    /// Update product details, then reconcile its prices. Nothing changes at
    /// the provider unless the price list is valid.
    pub async fn update_product(
        &self,
        product_id: &str,
        request: &UpdateProductRequest,
    ) -> BillingResult<UpdatedProduct> {
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(BillingError::InvalidInput(
                    "product name is required".to_string(),
                ));
            }
        }
        if request.credits.is_some_and(|c| c < 0) {
            return Err(BillingError::InvalidInput(
                "credits must not be negative".to_string(),
            ));
        }
        // The price plan must hold before the product itself changes
        let prepared = self
            .reconciler
            .prepare(&ReconcileRequest {
                product_id: product_id.to_string(),
                prices: request.prices.clone(),
                prices_to_reactivate: request.prices_to_reactivate.clone(),
            })
            .await?;

        let current = prepared.product();
        let patch = product_patch(current, request);
        let mut product = if patch == ProductPatch::default() {
            current.clone()
        } else {
            let updated = self.gateway.update_product(product_id, &patch).await?;
            tracing::info!(product_id = %product_id, "Product details updated");
            updated
        };

        let reconcile = self.reconciler.execute(prepared).await?;
        product.default_price = reconcile.default_price.clone();

        Ok(UpdatedProduct { product, reconcile })
    }

    async fn compensate(&self, product_id: &str) {
        match self
            .gateway
            .update_product(product_id, &ProductPatch::archive())
            .await
        {
            Ok(_) => tracing::warn!(product_id = %product_id, "Archived partially created product"),
            Err(e) => tracing::error!(
                product_id = %product_id,
                error = %e,
                "Failed to archive partially created product"
            ),
        }
    }
}

/// Only the fields that differ from the current product. Metadata keys set
/// to an empty string are removed by the provider.
fn product_patch(current: &RemoteProduct, request: &UpdateProductRequest) -> ProductPatch {
    let mut patch = ProductPatch::default();

    if let Some(name) = &request.name {
        if name != &current.name {
            patch.name = Some(name.clone());
        }
    }
    if let Some(description) = &request.description {
        if current.description.as_ref() != Some(description) {
            patch.description = Some(description.clone());
        }
    }

    let mut metadata: HashMap<String, String> = HashMap::new();
    let mut set = |key: String, value: String| {
        let unchanged = match current.metadata.get(&key) {
            Some(existing) => existing == &value,
            None => value.is_empty(),
        };
        if !unchanged {
            metadata.insert(key, value);
        }
    };

    if let Some(credits) = request.credits {
        set(CREDITS_METADATA_KEY.to_string(), credits.to_string());
    }
    if let Some(rollover) = request.credits_rollover {
        set(CREDITS_ROLLOVER_METADATA_KEY.to_string(), rollover.to_string());
    }
    if let Some(role) = &request.role {
        set(ROLE_METADATA_KEY.to_string(), role.trim().to_string());
    }
    if let Some(features) = &request.features {
        for (index, feature) in features.iter().enumerate() {
            set(
                format!("{}{}", FEATURE_METADATA_PREFIX, index + 1),
                feature.clone(),
            );
        }
        let stale: Vec<String> = current
            .metadata
            .keys()
            .filter(|key| {
                key.strip_prefix(FEATURE_METADATA_PREFIX)
                    .and_then(|n| n.parse::<usize>().ok())
                    .is_some_and(|n| n > features.len())
            })
            .cloned()
            .collect();
        for key in stale {
            set(key, String::new());
        }
    }

    if !metadata.is_empty() {
        patch.metadata = Some(metadata);
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> RemoteProduct {
        RemoteProduct {
            id: "prod_1".into(),
            name: "Pro".into(),
            description: Some("All features".into()),
            images: vec![],
            statement_descriptor: None,
            tax_code: None,
            metadata: [
                ("credits", "500"),
                ("credits_rollover", "false"),
                ("feature_1", "Fast"),
                ("feature_2", "Cheap"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            active: true,
            default_price: Some("price_1".into()),
        }
    }

    #[test]
    fn test_unchanged_request_produces_empty_patch() {
        let request = UpdateProductRequest {
            name: Some("Pro".into()),
            description: Some("All features".into()),
            credits: Some(500),
            features: Some(vec!["Fast".into(), "Cheap".into()]),
            ..Default::default()
        };
        assert_eq!(product_patch(&product(), &request), ProductPatch::default());
    }

    #[test]
    fn test_dropped_features_are_cleared() {
        let request = UpdateProductRequest {
            features: Some(vec!["Faster".into()]),
            ..Default::default()
        };
        let patch = product_patch(&product(), &request);
        let metadata = patch.metadata.unwrap();
        assert_eq!(metadata.get("feature_1").map(String::as_str), Some("Faster"));
        assert_eq!(metadata.get("feature_2").map(String::as_str), Some(""));
    }

    #[test]
    fn test_changed_credits_are_patched() {
        let request = UpdateProductRequest {
            name: Some("Pro Max".into()),
            credits: Some(800),
            credits_rollover: Some(true),
            ..Default::default()
        };
        let patch = product_patch(&product(), &request);
        assert_eq!(patch.name.as_deref(), Some("Pro Max"));
        let metadata = patch.metadata.unwrap();
        assert_eq!(metadata.get("credits").map(String::as_str), Some("800"));
        assert_eq!(metadata.get("credits_rollover").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_create_request_reads_form_shape() {
        let request: CreateProductRequest = serde_json::from_value(serde_json::json!({
            "name": "Starter",
            "description": "Entry tier",
            "credits": 100,
            "creditsRollover": true,
            "features": ["One", "Two"],
            "prices": [
                { "amount": 900, "paymentType": "recurring", "billingPeriod": "month", "isDefault": true }
            ]
        }))
        .unwrap();
        assert_eq!(request.product.name, "Starter");
        assert!(request.product.credits_rollover);
        assert_eq!(request.prices.len(), 1);
    }
}
