use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::MarketApiState;
use crate::error::{MarketError, MarketResult};
use crate::ledger::CreditSource;
use crate::payments::{WebhookEvent, SIGNATURE_HEADER};

/// Provider webhook. The raw body is verified before it is parsed.
pub async fn payment_webhook(
    State(state): State<MarketApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> MarketResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| MarketError::validation("Missing webhook signature"))?;

    let authority = state
        .webhooks
        .verify(signature, &body, Utc::now().timestamp())?;
    let event = WebhookEvent::parse(&body)?;

    let Some(intent) = event.succeeded_intent()? else {
        debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
        return Ok(Json(json!({ "received": true })));
    };

    let outcome = state
        .ledger
        .credit_payment(&intent, CreditSource::PaymentWebhook(authority))
        .await?;

    info!(event_id = %event.id, intent_id = %intent.id, "Payment webhook handled");
    Ok(Json(json!({ "received": true, "result": outcome })))
}
