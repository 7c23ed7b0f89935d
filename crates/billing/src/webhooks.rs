//! Stripe webhook handling
//!
//! Only checkout completion matters here: a paid session credits the package's
//! points to the buyer, keyed by session id so redelivery credits once. Every
//! other event type is acknowledged and ignored.
//!
//! Signatures are checked by hand (HMAC-SHA256 over `"{t}.{payload}"`) and the
//! payload is read into a narrow event shape, so newer Stripe API versions with
//! unfamiliar fields still parse.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use pointgate_shared::UserId;

use crate::checkout::{METADATA_POINTS, METADATA_USER_ID};
use crate::error::{BillingError, BillingResult};
use crate::ledger::{CreditEntry, CreditOutcome, Ledger};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
const CHECKOUT_ASYNC_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// What a verified event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited {
        user_id: UserId,
        points: i64,
        balance: i64,
    },
    Duplicate,
    /// Session completed but not yet paid (e.g. delayed payment methods)
    AwaitingPayment,
    Ignored,
}

/// Check a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`) against `payload`
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in Stripe-Signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in Stripe-Signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("invalid webhook secret".to_string()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let expected = mac.finalize().into_bytes();

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| bool::from(bytes.as_slice().ct_eq(expected.as_slice())))
            .unwrap_or(false)
    });

    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Compute the `v1` signature for `payload` at `timestamp`
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("invalid webhook secret".to_string()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    ledger: Arc<dyn Ledger>,
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(ledger: Arc<dyn Ledger>, webhook_secret: String) -> Self {
        Self {
            ledger,
            webhook_secret,
        }
    }

    /// Verify the signature and parse the event
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.webhook_secret, now)?;

        let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookPayload(e.to_string())
        })?;

        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Webhook event verified"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    pub async fn handle_event(&self, event: WebhookEvent) -> BillingResult<WebhookOutcome> {
        match event.event_type.as_str() {
            CHECKOUT_COMPLETED | CHECKOUT_ASYNC_SUCCEEDED => {
                self.handle_checkout_paid(&event).await
            }
            other => {
                tracing::debug!(event_id = %event.id, event_type = %other, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn handle_checkout_paid(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        let session: CheckoutSessionObject = serde_json::from_value(event.data.object.clone())
            .map_err(|e| BillingError::WebhookPayload(format!("expected checkout session: {e}")))?;

        if session.payment_status.as_deref() != Some("paid") {
            tracing::info!(
                event_id = %event.id,
                session_id = %session.id,
                payment_status = ?session.payment_status,
                "Checkout completed without payment yet"
            );
            return Ok(WebhookOutcome::AwaitingPayment);
        }

        let user_id: UserId = metadata_field(&session, METADATA_USER_ID)?;
        let points: i64 = metadata_field(&session, METADATA_POINTS)?;

        let outcome = self
            .ledger
            .credit(
                user_id,
                points,
                CreditEntry::idempotent("purchase", &session.id),
            )
            .await?;

        match outcome {
            CreditOutcome::Applied { balance } => {
                tracing::info!(
                    event_id = %event.id,
                    session_id = %session.id,
                    user_id = %user_id,
                    points,
                    balance,
                    "Purchased points credited"
                );
                Ok(WebhookOutcome::Credited {
                    user_id,
                    points,
                    balance,
                })
            }
            CreditOutcome::Duplicate => {
                tracing::info!(
                    event_id = %event.id,
                    session_id = %session.id,
                    "Duplicate checkout webhook, already credited"
                );
                Ok(WebhookOutcome::Duplicate)
            }
        }
    }
}

fn metadata_field<T: std::str::FromStr>(
    session: &CheckoutSessionObject,
    key: &str,
) -> BillingResult<T> {
    session
        .metadata
        .get(key)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| {
            BillingError::WebhookPayload(format!(
                "session {} has missing or invalid metadata '{key}'",
                session.id
            ))
        })
}
