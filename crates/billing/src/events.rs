//! Inbound billing events
//!
//! A verified webhook body is parsed into a closed set of variants. Kinds the
//! engine does not act on are kept as [`BillingEvent::Unhandled`] so they are
//! acknowledged without processing.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use storefront_shared::UserId;

use crate::error::{BillingError, BillingResult};
use crate::gateway::RemotePrice;
use crate::stripe_gateway::{expandable_id, price_from_json, string_map};

/// Metadata keys that may carry the purchasing user
const USER_ID_METADATA_KEYS: [&str; 2] = ["userId", "user_id"];
/// Metadata key naming the referring affiliate on a checkout
pub const AFFILIATE_METADATA_KEY: &str = "affiliate_user_id";

/// Invoice billing reason for the first invoice of a subscription
pub const BILLING_REASON_SUBSCRIPTION_CREATE: &str = "subscription_create";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Payment,
    Subscription,
    Setup,
}

impl CheckoutMode {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("subscription") => CheckoutMode::Subscription,
            Some("setup") => CheckoutMode::Setup,
            _ => CheckoutMode::Payment,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, CheckoutMode::Subscription)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionPayload {
    pub id: String,
    pub mode: CheckoutMode,
    pub subscription_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    /// Minor units
    pub amount_total: i64,
    pub created: i64,
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionPayload {
    pub fn user_id(&self) -> Option<UserId> {
        user_id_from(&self.metadata)
    }

    pub fn affiliate_user_id(&self) -> Option<UserId> {
        self.metadata
            .get(AFFILIATE_METADATA_KEY)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(UserId::from)
    }

    /// Ledger key of the purchase: the subscription for recurring checkouts,
    /// otherwise the payment, falling back to the session itself
    pub fn transaction_id(&self) -> &str {
        self.subscription_id
            .as_deref()
            .or(self.payment_intent_id.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePayload {
    pub id: String,
    pub subscription_id: Option<String>,
    pub billing_reason: Option<String>,
    pub amount_paid: i64,
    /// Unix time the invoice was paid, or its creation time
    pub paid_at: i64,
    /// Price of the first invoice line
    pub price: Option<RemotePrice>,
}

impl InvoicePayload {
    pub fn is_subscription_create(&self) -> bool {
        self.billing_reason.as_deref() == Some(BILLING_REASON_SUBSCRIPTION_CREATE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPayload {
    pub id: String,
    pub metadata: HashMap<String, String>,
    pub price: Option<RemotePrice>,
}

impl SubscriptionPayload {
    pub fn user_id(&self) -> Option<UserId> {
        user_id_from(&self.metadata)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutSessionPayload),
    InvoicePaid(InvoicePayload),
    SubscriptionDeleted(SubscriptionPayload),
    Unhandled { kind: String },
}

impl BillingEvent {
    pub fn kind(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted(_) => "checkout.session.completed",
            BillingEvent::InvoicePaid(_) => "invoice.paid",
            BillingEvent::SubscriptionDeleted(_) => "customer.subscription.deleted",
            BillingEvent::Unhandled { kind } => kind,
        }
    }
}

impl fmt::Display for BillingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Verified event envelope
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub created: i64,
    pub event: BillingEvent,
}

impl WebhookEvent {
    /// Parse a raw event body. Only call this on bytes whose signature was
    /// already checked.
    pub fn parse(payload: &[u8]) -> BillingResult<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| BillingError::WebhookPayload(format!("invalid JSON: {}", e)))?;

        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::WebhookPayload("event has no id".to_string()))?
            .to_string();
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::WebhookPayload("event has no type".to_string()))?;
        let created = value.get("created").and_then(Value::as_i64).unwrap_or(0);
        let object = value.pointer("/data/object").unwrap_or(&Value::Null);

        let event = match kind {
            "checkout.session.completed" => {
                BillingEvent::CheckoutCompleted(checkout_from_json(object)?)
            }
            // Stripe also sends `invoice.payment_succeeded` for the same
            // invoice under another event id; only one of the pair settles
            "invoice.paid" => BillingEvent::InvoicePaid(invoice_from_json(object)?),
            "customer.subscription.deleted" => {
                BillingEvent::SubscriptionDeleted(subscription_payload_from_json(object)?)
            }
            other => BillingEvent::Unhandled {
                kind: other.to_string(),
            },
        };

        Ok(Self { id, created, event })
    }
}

fn user_id_from(metadata: &HashMap<String, String>) -> Option<UserId> {
    USER_ID_METADATA_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(UserId::from)
}

fn object_id(object: &Value, what: &str) -> BillingResult<String> {
    object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BillingError::WebhookPayload(format!("{} payload has no id", what)))
}

fn checkout_from_json(object: &Value) -> BillingResult<CheckoutSessionPayload> {
    let customer_email = object
        .get("customer_email")
        .and_then(Value::as_str)
        .or_else(|| {
            object
                .pointer("/customer_details/email")
                .and_then(Value::as_str)
        })
        .map(str::to_string);

    Ok(CheckoutSessionPayload {
        id: object_id(object, "checkout session")?,
        mode: CheckoutMode::parse(object.get("mode").and_then(Value::as_str)),
        subscription_id: object.get("subscription").and_then(expandable_id),
        payment_intent_id: object.get("payment_intent").and_then(expandable_id),
        customer_id: object.get("customer").and_then(expandable_id),
        customer_email,
        amount_total: object
            .get("amount_total")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        created: object.get("created").and_then(Value::as_i64).unwrap_or(0),
        metadata: object.get("metadata").map(string_map).unwrap_or_default(),
    })
}

fn invoice_from_json(object: &Value) -> BillingResult<InvoicePayload> {
    // Newer API versions move the subscription under `parent`
    let subscription_id = object
        .get("subscription")
        .and_then(expandable_id)
        .or_else(|| {
            object
                .pointer("/parent/subscription_details/subscription")
                .and_then(expandable_id)
        });

    let price = object
        .pointer("/lines/data/0/price")
        .filter(|p| p.is_object())
        .map(price_from_json)
        .transpose()?;

    let created = object.get("created").and_then(Value::as_i64).unwrap_or(0);

    Ok(InvoicePayload {
        id: object_id(object, "invoice")?,
        subscription_id,
        billing_reason: object
            .get("billing_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
        amount_paid: object
            .get("amount_paid")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        paid_at: object
            .pointer("/status_transitions/paid_at")
            .and_then(Value::as_i64)
            .unwrap_or(created),
        price,
    })
}

fn subscription_payload_from_json(object: &Value) -> BillingResult<SubscriptionPayload> {
    let price = object
        .pointer("/items/data/0/price")
        .filter(|p| p.is_object())
        .map(price_from_json)
        .transpose()?;

    Ok(SubscriptionPayload {
        id: object_id(object, "subscription")?,
        metadata: object.get("metadata").map(string_map).unwrap_or_default(),
        price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(kind: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_123",
            "type": kind,
            "created": 1_760_000_000,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn test_checkout_session_is_parsed() {
        let event = WebhookEvent::parse(&body(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "subscription": "sub_1",
                "payment_intent": null,
                "customer": "cus_1",
                "customer_details": { "email": "buyer@example.com" },
                "amount_total": 1500,
                "metadata": { "userId": "user_1", "affiliate_user_id": "user_9" }
            }),
        ))
        .unwrap();

        let BillingEvent::CheckoutCompleted(session) = event.event else {
            panic!("expected checkout event");
        };
        assert!(session.mode.is_recurring());
        assert_eq!(session.transaction_id(), "sub_1");
        assert_eq!(session.user_id(), Some(UserId::from("user_1")));
        assert_eq!(session.affiliate_user_id(), Some(UserId::from("user_9")));
        assert_eq!(session.customer_email.as_deref(), Some("buyer@example.com"));
    }

    #[test]
    fn test_one_time_checkout_keys_by_payment_intent() {
        let event = WebhookEvent::parse(&body(
            "checkout.session.completed",
            json!({ "id": "cs_2", "mode": "payment", "payment_intent": "pi_2", "metadata": {} }),
        ))
        .unwrap();

        let BillingEvent::CheckoutCompleted(session) = event.event else {
            panic!("expected checkout event");
        };
        assert_eq!(session.transaction_id(), "pi_2");
        assert_eq!(session.user_id(), None);
    }

    #[test]
    fn test_invoice_reads_subscription_and_reason() {
        let event = WebhookEvent::parse(&body(
            "invoice.paid",
            json!({
                "id": "in_1",
                "subscription": "sub_1",
                "billing_reason": "subscription_cycle",
                "amount_paid": 1000,
                "status_transitions": { "paid_at": 1_760_000_100 },
                "lines": { "data": [ { "price": {
                    "id": "price_1", "product": "prod_1", "unit_amount": 1000,
                    "recurring": { "interval": "month" }
                } } ] }
            }),
        ))
        .unwrap();

        let BillingEvent::InvoicePaid(invoice) = event.event else {
            panic!("expected invoice event");
        };
        assert_eq!(invoice.subscription_id.as_deref(), Some("sub_1"));
        assert!(!invoice.is_subscription_create());
        assert_eq!(invoice.paid_at, 1_760_000_100);
        assert_eq!(invoice.price.unwrap().product_id, "prod_1");
    }

    #[test]
    fn test_unknown_kind_is_unhandled() {
        let event = WebhookEvent::parse(&body("customer.created", json!({ "id": "cus_1" }))).unwrap();
        assert_eq!(
            event.event,
            BillingEvent::Unhandled {
                kind: "customer.created".into()
            }
        );
    }

    #[test]
    fn test_payment_succeeded_is_not_a_second_invoice_event() {
        let event = WebhookEvent::parse(&body(
            "invoice.payment_succeeded",
            json!({ "id": "in_1", "subscription": "sub_1" }),
        ))
        .unwrap();
        assert_eq!(
            event.event,
            BillingEvent::Unhandled {
                kind: "invoice.payment_succeeded".into()
            }
        );
    }

    #[test]
    fn test_envelope_without_id_is_rejected() {
        let err = WebhookEvent::parse(br#"{"type":"invoice.paid"}"#).unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayload(_)));
        assert!(WebhookEvent::parse(b"not json").is_err());
    }
}
