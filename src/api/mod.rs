//! HTTP API for the marketplace ledger
//!
//! Provides REST APIs for:
//! - Account (profile, balance, payment confirmation)
//! - Reports (filing, viewing)
//! - Staff administration (report review, user actions, manual grants)
//! - Payment provider webhooks
//! - Security middleware (rate limiting, headers, body size, store probe)

pub mod account;
pub mod admin;
pub mod extract;
pub mod middleware;
pub mod reports;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRef, State},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthContext, TokenService};
use crate::database::DatabasePool;
use crate::error::MarketResult;
use crate::ledger::CreditLedger;
use crate::moderation::{ModerationManager, TrustPenalty};
use crate::payments::{PaymentGateway, WebhookVerifier};

pub use middleware::{
    body_size_middleware, database_probe_middleware, logging_middleware, rate_limit_middleware,
    security_headers_middleware, RateLimiter, SecurityMiddlewareConfig, SecurityState,
};

#[derive(Clone)]
pub struct MarketApiState {
    pub db: Arc<DatabasePool>,
    pub ledger: Arc<CreditLedger>,
    pub moderation: Arc<ModerationManager>,
    pub tokens: Arc<TokenService>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub webhooks: Arc<WebhookVerifier>,
}

impl MarketApiState {
    pub fn new(
        db: Arc<DatabasePool>,
        tokens: TokenService,
        gateway: Arc<dyn PaymentGateway>,
        webhooks: WebhookVerifier,
        penalty: TrustPenalty,
    ) -> Self {
        Self {
            ledger: Arc::new(CreditLedger::new(db.clone())),
            moderation: Arc::new(ModerationManager::new(db.clone(), penalty)),
            tokens: Arc::new(tokens),
            webhooks: Arc::new(webhooks),
            gateway,
            db,
        }
    }
}

impl FromRef<MarketApiState> for AuthContext {
    fn from_ref(state: &MarketApiState) -> Self {
        AuthContext {
            tokens: state.tokens.clone(),
            db: state.db.clone(),
        }
    }
}

async fn health(State(state): State<MarketApiState>) -> MarketResult<Json<Value>> {
    state.db.ensure_available().await?;
    let store = if state.db.is_in_memory() {
        "memory"
    } else {
        "postgres"
    };
    Ok(Json(json!({ "status": "ok", "store": store })))
}

/// Routes only, without the outer security layers
pub fn create_router(state: MarketApiState) -> Router {
    let api = Router::new()
        .route("/me", get(account::me))
        .route("/credits", get(account::balance))
        .route("/credits/confirm", post(account::confirm_payment))
        .route("/reports", post(reports::file_report))
        .route("/reports/{id}", get(reports::get_report))
        .route("/admin/reports", get(admin::list_reports))
        .route("/admin/reports/{id}/review", post(admin::review_report))
        .route("/admin/users/{id}", post(admin::user_action))
        .route("/admin/users/{id}/credits", post(admin::grant_credits))
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .route_layer(from_fn_with_state(
            state.db.clone(),
            database_probe_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

/// Full application: routes plus security middleware (order matters)
pub fn create_app(state: MarketApiState, security: SecurityState) -> Router {
    let max_body = security.config.max_request_size;
    create_router(state)
        // Bodies without Content-Length are cut off while extractors buffer them
        .layer(DefaultBodyLimit::max(max_body))
        .layer(from_fn_with_state(security.clone(), body_size_middleware))
        .layer(from_fn_with_state(security.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(security, logging_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
}
