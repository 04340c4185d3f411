use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use market_ledger::{
    api::{create_app, MarketApiState, SecurityMiddlewareConfig, SecurityState},
    auth::{ensure_bootstrap_admin, TokenService},
    config::{sanitize_for_logging, MarketConfig},
    payments::{ProviderGateway, WebhookVerifier},
    DatabasePool, PenaltyPolicy,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = MarketConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check MARKET_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting marketplace ledger service");

    let db = Arc::new(
        DatabasePool::connect(&config.database)
            .await
            .context("Failed to initialize database")?,
    );
    db.ensure_available()
        .await
        .context("Database is not reachable")?;
    db.init_schema()
        .await
        .context("Failed to initialize database schema")?;

    let tokens = TokenService::new(&config.auth);

    if let Some(email) = &config.bootstrap_admin_email {
        let (admin, token) = ensure_bootstrap_admin(&db, &tokens, email)
            .await
            .context("Failed to bootstrap admin account")?;
        info!(
            user_id = %admin.id,
            token = %sanitize_for_logging(&token),
            "Bootstrap admin ready"
        );
    }

    let gateway = ProviderGateway::new(&config.payments)?;
    let webhooks = WebhookVerifier::new(
        &config.payments.webhook_secret,
        config.payments.webhook_tolerance_secs,
    );

    let penalty = config.moderation.to_penalty();
    info!(
        points = penalty.points,
        policy = ?penalty.policy,
        "Trust penalty configured"
    );
    if penalty.policy == PenaltyPolicy::Unbounded {
        warn!("Trust penalties are unbounded - scores may drop below zero");
    }

    let state = MarketApiState::new(db.clone(), tokens, Arc::new(gateway), webhooks, penalty);

    let security_state = SecurityState::new(SecurityMiddlewareConfig::from(&config));
    spawn_rate_limit_cleanup(&security_state);

    let app = create_app(state, security_state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("Marketplace ledger listening on {}", bind_addr);
    info!(
        "Security middleware: Rate limit={}/min, Max body={}KB, Store={}",
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024,
        if db.is_in_memory() { "memory" } else { "postgres" }
    );
    if db.is_in_memory() {
        warn!("Running without PostgreSQL; balances and reports are not persisted");
    }

    // Serve with connect info for client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_logging(config: &MarketConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if config.logging.sanitize_logs {
        info!("Logging initialized with data sanitization enabled");
    }

    Ok(())
}

fn spawn_rate_limit_cleanup(security: &SecurityState) {
    let limiter = security.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });
}
