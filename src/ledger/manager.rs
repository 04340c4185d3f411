//! Credit Ledger - authorization and validation in front of atomic store ops

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::{
    Balance, DatabasePool, PaymentOutcome, ProcessedPayment, User, MAX_MANUAL_CREDITS,
};
use crate::error::{MarketError, MarketResult};
use crate::ledger::CreditSource;
use crate::payments::{IntentStatus, PaymentIntent};

/// Credits bought per US dollar
pub const CREDITS_PER_USD: i64 = 10;

/// Convert a charge in cents to credits, rounding down
pub fn credits_for_cents(amount_cents: i64) -> i64 {
    amount_cents.max(0) * CREDITS_PER_USD / 100
}

pub struct CreditLedger {
    db: Arc<DatabasePool>,
}

impl CreditLedger {
    pub fn new(db: Arc<DatabasePool>) -> Self {
        Self { db }
    }

    /// Add `amount` credits to `user_id`.
    pub async fn increment(
        &self,
        user_id: Uuid,
        amount: i64,
        source: CreditSource<'_>,
    ) -> MarketResult<Balance> {
        if amount <= 0 {
            return Err(MarketError::validation("Amount must be a positive integer"));
        }

        self.authorize(user_id, &source)?;

        let balance = self
            .db
            .users()
            .increment_credits(user_id, amount)
            .await?
            .ok_or_else(|| MarketError::not_found("User not found"))?;

        info!(
            user_id = %user_id,
            amount,
            source = source.label(),
            credits = balance.credits,
            "Credits incremented"
        );

        Ok(balance)
    }

    /// Admin top-up that also counts against the manual credit ceiling
    pub async fn grant_manual(
        &self,
        admin: &User,
        user_id: Uuid,
        amount: i64,
    ) -> MarketResult<Balance> {
        let source = CreditSource::AdminGrant { admin };
        self.authorize(user_id, &source)?;

        if amount <= 0 || amount > MAX_MANUAL_CREDITS as i64 {
            return Err(MarketError::validation(format!(
                "Amount must be between 1 and {}",
                MAX_MANUAL_CREDITS
            )));
        }

        let balance = self
            .db
            .users()
            .grant_manual_credits(user_id, amount as i32)
            .await?;

        info!(
            admin_id = %admin.id,
            user_id = %user_id,
            amount,
            manual_credits = balance.manual_credits,
            "Manual credits granted"
        );

        Ok(balance)
    }

    /// Credit the owner of a succeeded payment intent. The intent id is
    /// recorded before the balance moves, so a replay through the other path
    /// reports `AlreadyProcessed` and credits nothing.
    pub async fn credit_payment(
        &self,
        intent: &PaymentIntent,
        source: CreditSource<'_>,
    ) -> MarketResult<PaymentOutcome> {
        let payment_source = source.payment_source().ok_or_else(|| {
            MarketError::forbidden("Payments settle only through confirmation or webhook")
        })?;

        if intent.status != IntentStatus::Succeeded {
            return Err(MarketError::validation(format!(
                "Payment intent {} has not succeeded",
                intent.id
            )));
        }

        if !intent.currency.eq_ignore_ascii_case("usd") {
            return Err(MarketError::validation(format!(
                "Unsupported currency: {}",
                intent.currency
            )));
        }

        let owner = intent.user_id.ok_or_else(|| {
            MarketError::validation("Payment intent is not linked to a user")
        })?;

        self.authorize(owner, &source)?;

        let credits = credits_for_cents(intent.amount_cents);
        if credits <= 0 {
            return Err(MarketError::validation(
                "Payment amount is too small to buy credits",
            ));
        }

        let outcome = self
            .db
            .payments()
            .credit_once(&ProcessedPayment {
                intent_id: intent.id.clone(),
                user_id: owner,
                credits,
                source: payment_source,
                processed_at: Utc::now(),
            })
            .await?;

        if let PaymentOutcome::AlreadyProcessed { first_source } = &outcome {
            info!(
                intent_id = %intent.id,
                first_source = first_source.as_str(),
                replay_source = payment_source.as_str(),
                "Ignoring replayed payment intent"
            );
        }

        Ok(outcome)
    }

    pub async fn balance(&self, user_id: Uuid) -> MarketResult<Balance> {
        let user = self
            .db
            .users()
            .get_user(user_id)
            .await?
            .ok_or_else(|| MarketError::not_found("User not found"))?;

        Ok(Balance {
            credits: user.credits,
            manual_credits: user.manual_credits,
        })
    }

    fn authorize(&self, user_id: Uuid, source: &CreditSource<'_>) -> MarketResult<()> {
        match source {
            CreditSource::SelfService { caller } => {
                if caller.is_banned {
                    warn!(caller = %caller.id, "Banned user attempted a credit change");
                    return Err(MarketError::forbidden("Account is banned"));
                }
                if caller.id != user_id {
                    warn!(caller = %caller.id, target = %user_id, "Credit change for another user refused");
                    return Err(MarketError::forbidden(
                        "Cannot change another user's credits",
                    ));
                }
                Ok(())
            }
            CreditSource::AdminGrant { admin } => {
                if !source.is_admin() {
                    warn!(caller = %admin.id, "Non-admin attempted a credit grant");
                    return Err(MarketError::forbidden("Admin role required"));
                }
                Ok(())
            }
            CreditSource::PaymentWebhook(_) => Ok(()),
        }
    }
}
