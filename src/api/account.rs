//! Signed-in user endpoints: profile, balance and payment confirmation

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use super::extract::ApiJson;
use super::MarketApiState;
use crate::auth::{CurrentUser, SessionUser};
use crate::database::{Balance, PaymentOutcome, User};
use crate::error::MarketResult;
use crate::ledger::CreditSource;

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
}

/// Banned users can still read their own profile, including the ban reason
pub async fn me(SessionUser(user): SessionUser) -> Json<User> {
    Json(user)
}

pub async fn balance(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
) -> MarketResult<Json<Balance>> {
    Ok(Json(state.ledger.balance(user.id).await?))
}

/// Client-side confirmation after checkout. The intent is fetched from the
/// provider rather than trusted from the request.
pub async fn confirm_payment(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<ConfirmPaymentRequest>,
) -> MarketResult<Json<PaymentOutcome>> {
    let intent = state.gateway.retrieve_intent(&req.payment_intent_id).await?;

    let outcome = state
        .ledger
        .credit_payment(&intent, CreditSource::SelfService { caller: &user })
        .await?;

    info!(user_id = %user.id, intent_id = %intent.id, "Payment confirmation handled");
    Ok(Json(outcome))
}
