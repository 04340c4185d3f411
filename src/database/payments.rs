//! Payment Repository - processed payment intents
//!
//! A payment intent credits its owner at most once, whichever path
//! (client confirmation or provider webhook) reports it first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::pool::Backend;
use super::users::{add_credits, Balance};
use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Confirmation,
    Webhook,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::Confirmation => "confirmation",
            PaymentSource::Webhook => "webhook",
        }
    }

    fn parse(value: &str) -> MarketResult<Self> {
        match value {
            "confirmation" => Ok(PaymentSource::Confirmation),
            "webhook" => Ok(PaymentSource::Webhook),
            other => Err(MarketError::Internal(format!(
                "Unknown payment source: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedPayment {
    pub intent_id: String,
    pub user_id: Uuid,
    pub credits: i64,
    pub source: PaymentSource,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Credited { balance: Balance },
    AlreadyProcessed { first_source: PaymentSource },
}

pub struct PaymentRepository {
    backend: Backend,
}

impl PaymentRepository {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Record the intent and credit its owner in one step. A second call for
    /// the same intent id credits nothing.
    pub async fn credit_once(&self, payment: &ProcessedPayment) -> MarketResult<PaymentOutcome> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let mut tx = pool.begin().await?;

                let inserted = sqlx::query(
                    r#"
                    INSERT INTO market.processed_payments
                    (intent_id, user_id, credits, source, processed_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (intent_id) DO NOTHING
                    "#,
                )
                .bind(&payment.intent_id)
                .bind(payment.user_id)
                .bind(payment.credits)
                .bind(payment.source.as_str())
                .bind(payment.processed_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| match &e {
                    sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                        MarketError::not_found("User not found")
                    }
                    _ => MarketError::from(e),
                })?
                .rows_affected();

                if inserted == 0 {
                    tx.rollback().await?;
                    let first = self
                        .get_processed(&payment.intent_id)
                        .await?
                        .map(|p| p.source)
                        .unwrap_or(payment.source);
                    debug!(intent_id = %payment.intent_id, "Payment intent already processed");
                    return Ok(PaymentOutcome::AlreadyProcessed {
                        first_source: first,
                    });
                }

                let balance = add_credits(&mut *tx, payment.user_id, payment.credits).await?;
                let Some(balance) = balance else {
                    tx.rollback().await?;
                    return Err(MarketError::not_found("User not found"));
                };

                tx.commit().await?;

                info!(
                    intent_id = %payment.intent_id,
                    user_id = %payment.user_id,
                    credits = payment.credits,
                    source = payment.source.as_str(),
                    "Payment credited"
                );

                Ok(PaymentOutcome::Credited { balance })
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;

                if let Some(existing) = tables.processed_payments.get(&payment.intent_id) {
                    debug!(intent_id = %payment.intent_id, "Payment intent already processed");
                    return Ok(PaymentOutcome::AlreadyProcessed {
                        first_source: existing.source,
                    });
                }

                let balance = tables
                    .add_credits(payment.user_id, payment.credits)
                    .ok_or_else(|| MarketError::not_found("User not found"))?;

                tables
                    .processed_payments
                    .insert(payment.intent_id.clone(), payment.clone());

                info!(
                    intent_id = %payment.intent_id,
                    user_id = %payment.user_id,
                    credits = payment.credits,
                    source = payment.source.as_str(),
                    "Payment credited"
                );

                Ok(PaymentOutcome::Credited { balance })
            }
        }
    }

    pub async fn get_processed(&self, intent_id: &str) -> MarketResult<Option<ProcessedPayment>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(
                    r#"
                    SELECT intent_id, user_id, credits, source, processed_at
                    FROM market.processed_payments
                    WHERE intent_id = $1
                    "#,
                )
                .bind(intent_id)
                .fetch_optional(pool)
                .await?;

                match row {
                    Some(row) => {
                        let source: String = row.try_get("source")?;
                        Ok(Some(ProcessedPayment {
                            intent_id: row.try_get("intent_id")?,
                            user_id: row.try_get("user_id")?,
                            credits: row.try_get("credits")?,
                            source: PaymentSource::parse(&source)?,
                            processed_at: row.try_get("processed_at")?,
                        }))
                    }
                    None => Ok(None),
                }
            }
            Backend::InMemory(tables) => Ok(tables
                .read()
                .await
                .processed_payments
                .get(intent_id)
                .cloned()),
        }
    }
}
