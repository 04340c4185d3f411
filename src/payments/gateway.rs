//! Payment intent lookups against the provider REST API

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::error::{MarketError, MarketResult};

const MAX_INTENT_ID_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

/// The parts of a provider payment intent the ledger cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount_cents: i64,
    pub currency: String,
    /// Owner taken from the intent's `user_id` metadata
    pub user_id: Option<Uuid>,
}

/// Wire shape of a provider intent object
#[derive(Debug, Deserialize)]
pub(crate) struct ProviderIntent {
    id: String,
    status: IntentStatus,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<ProviderIntent> for PaymentIntent {
    fn from(intent: ProviderIntent) -> Self {
        let user_id = intent
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok());

        Self {
            id: intent.id,
            status: intent.status,
            amount_cents: intent.amount,
            currency: intent.currency,
            user_id,
        }
    }
}

pub(crate) fn validate_intent_id(intent_id: &str) -> MarketResult<()> {
    let well_formed = !intent_id.is_empty()
        && intent_id.len() <= MAX_INTENT_ID_LEN
        && intent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if well_formed {
        Ok(())
    } else {
        Err(MarketError::validation("Invalid payment intent id"))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn retrieve_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent>;
}

/// HTTPS client for the provider's payment intent endpoint
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    http_client: Client,
    base_url: Url,
    secret_key: String,
}

impl ProviderGateway {
    pub fn new(config: &PaymentsConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Market-Ledger/1.0")
            .use_rustls_tls()
            .https_only(true)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(&config.provider_url)
            .context("Payment provider URL is not a valid URL")?;

        Ok(Self {
            http_client,
            base_url,
            secret_key: config.secret_key.clone(),
        })
    }

    fn intent_url(&self, intent_id: &str) -> MarketResult<Url> {
        self.base_url
            .join(&format!("/v1/payment_intents/{}", intent_id))
            .map_err(|e| MarketError::Internal(format!("Failed to build provider URL: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for ProviderGateway {
    async fn retrieve_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent> {
        validate_intent_id(intent_id)?;
        let url = self.intent_url(intent_id)?;

        debug!(intent_id, "Retrieving payment intent");

        let resp = self
            .http_client
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                warn!(intent_id, error = %e, "Payment provider request failed");
                MarketError::Unavailable("Payment provider unreachable".to_string())
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketError::not_found("Payment intent not found"));
        }

        if !resp.status().is_success() {
            warn!(intent_id, status = %resp.status(), "Payment provider returned an error");
            return Err(MarketError::Unavailable(format!(
                "Payment provider returned {}",
                resp.status()
            )));
        }

        let intent: ProviderIntent = resp.json().await.map_err(|e| {
            MarketError::Internal(format!("Failed to parse payment intent: {}", e))
        })?;

        Ok(intent.into())
    }
}
