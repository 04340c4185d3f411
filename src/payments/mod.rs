//! Payment provider integration
//!
//! The provider owns card handling. This side only looks up payment intents
//! and verifies signed webhook deliveries before money becomes credits.

mod gateway;
mod webhook;

pub use gateway::{IntentStatus, PaymentGateway, PaymentIntent, ProviderGateway};
pub use webhook::{
    WebhookAuthority, WebhookEvent, WebhookVerifier, PAYMENT_SUCCEEDED_EVENT, SIGNATURE_HEADER,
};
