//! Webhook signature verification
//!
//! Stripe signs `"{timestamp}.{raw_body}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. Verification runs over
//! the raw request bytes; a re-serialized body will not match.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted clock skew between signing and receipt
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> BillingResult<SignatureHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    BillingError::WebhookSignatureInvalid("malformed timestamp".to_string())
                })?);
            }
            Some(("v1", value)) if !value.is_empty() => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        BillingError::WebhookSignatureInvalid("signature header has no timestamp".to_string())
    })?;
    if signatures.is_empty() {
        return Err(BillingError::WebhookSignatureInvalid(
            "signature header has no v1 signature".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        BillingError::WebhookSignatureInvalid("unusable signing secret".to_string())
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex-encoded `v1` signature of a payload
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<String> {
    Ok(hex::encode(
        mac_for(secret, timestamp, payload)?.finalize().into_bytes(),
    ))
}

/// Check a signature header against the raw payload
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: OffsetDateTime,
) -> BillingResult<()> {
    let parsed = parse_header(header)?;

    let age = now.unix_timestamp().abs_diff(parsed.timestamp);
    if age > tolerance.as_secs() {
        return Err(BillingError::WebhookSignatureInvalid(format!(
            "timestamp outside tolerance ({}s)",
            age
        )));
    }

    let mac = mac_for(secret, parsed.timestamp, payload)?;
    let matched = parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(BillingError::WebhookSignatureInvalid(
            "no signature matches the payload".to_string(),
        ))
    }
}

/// Verify and parse an inbound event. A missing header or secret is a
/// rejection, never a bypass.
pub fn verify_event(
    payload: &[u8],
    header: Option<&str>,
    secret: Option<&str>,
    tolerance: Duration,
) -> BillingResult<WebhookEvent> {
    let header = header.filter(|h| !h.trim().is_empty()).ok_or_else(|| {
        BillingError::WebhookSignatureInvalid("missing signature header".to_string())
    })?;
    let secret = secret.filter(|s| !s.is_empty()).ok_or_else(|| {
        BillingError::WebhookSignatureInvalid("no webhook secret configured".to_string())
    })?;

    verify_signature(payload, header, secret, tolerance, OffsetDateTime::now_utc())?;
    WebhookEvent::parse(payload)
}
