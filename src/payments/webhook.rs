//! Signed webhook deliveries from the payment provider
//!
//! Header format: `Stripe-Signature: t=<unix seconds>,v1=<hex>`, where the
//! signature is HMAC-SHA256 over `"<t>.<raw body>"` keyed by the webhook
//! secret. Several `v1` entries may appear during secret rotation.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use super::gateway::{PaymentIntent, ProviderIntent};
use crate::error::{MarketError, MarketResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const PAYMENT_SUCCEEDED_EVENT: &str = "payment_intent.succeeded";

/// Proof that a request was signed by the payment provider.
/// Only [`WebhookVerifier::verify`] hands these out.
#[derive(Debug)]
pub struct WebhookAuthority {
    _verified: (),
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: &str, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            tolerance_secs,
        }
    }

    fn mac_for(&self, timestamp: i64, payload: &[u8]) -> MarketResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| MarketError::Internal(format!("Invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Build a signature header for `payload`. Used by tests and local tooling.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> MarketResult<String> {
        let signature = self.mac_for(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
    }

    pub fn verify(&self, header: &str, payload: &[u8], now: i64) -> MarketResult<WebhookAuthority> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| MarketError::validation("Webhook signature missing timestamp"))?;
        if signatures.is_empty() {
            return Err(MarketError::validation("Webhook signature missing v1 entry"));
        }

        if (now - timestamp).abs() > self.tolerance_secs {
            warn!(timestamp, now, "Webhook timestamp outside tolerance");
            return Err(MarketError::validation(
                "Webhook timestamp outside tolerance",
            ));
        }

        let mac = self.mac_for(timestamp, payload)?;
        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });

        if !matched {
            warn!("Webhook signature mismatch");
            return Err(MarketError::validation("Invalid webhook signature"));
        }

        debug!(timestamp, "Webhook signature verified");
        Ok(WebhookAuthority { _verified: () })
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> MarketResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| MarketError::validation(format!("Malformed webhook event: {}", e)))
    }

    /// The payment intent carried by a `payment_intent.succeeded` event.
    /// Other event types yield `None`.
    pub fn succeeded_intent(&self) -> MarketResult<Option<PaymentIntent>> {
        if self.event_type != PAYMENT_SUCCEEDED_EVENT {
            return Ok(None);
        }

        let intent: ProviderIntent = serde_json::from_value(self.data.object.clone())
            .map_err(|e| MarketError::validation(format!("Malformed payment intent: {}", e)))?;
        Ok(Some(intent.into()))
    }
}
