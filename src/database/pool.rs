//! Database Connection Pool using sqlx
//!
//! Connects to PostgreSQL when enabled. Otherwise every repository runs
//! against shared in-memory tables with the same semantics (dev mode and
//! tests).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::database::payments::{PaymentRepository, ProcessedPayment};
use crate::database::reports::ReportRepository;
use crate::database::users::{User, UserRepository};
use crate::error::{MarketError, MarketResult};
use crate::moderation::Report;

#[derive(Debug, Default)]
pub(crate) struct MemoryTables {
    pub users: HashMap<Uuid, User>,
    pub reports: HashMap<Uuid, Report>,
    pub processed_payments: HashMap<String, ProcessedPayment>,
}

#[derive(Clone)]
pub(crate) enum Backend {
    Postgres(PgPool),
    InMemory(Arc<RwLock<MemoryTables>>),
}

/// Bounded retry settings for the connection probe
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub timeout: Duration,
    pub delay: Duration,
}

impl From<&DatabaseConfig> for ProbeSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            attempts: config.probe_attempts.max(1),
            timeout: config.probe_timeout(),
            delay: config.probe_delay(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

pub struct DatabasePool {
    backend: Backend,
    probe: ProbeSettings,
    users: UserRepository,
    reports: ReportRepository,
    payments: PaymentRepository,
}

impl DatabasePool {
    /// Build the pool according to configuration: PostgreSQL if enabled,
    /// otherwise the in-memory fallback. No connection is opened here; call
    /// [`DatabasePool::ensure_available`] to check reachability.
    pub async fn connect(config: &DatabaseConfig) -> MarketResult<Self> {
        if !config.postgres_enabled {
            warn!("PostgreSQL disabled, using in-memory store (data is lost on restart)");
            return Ok(Self::in_memory_with(ProbeSettings::from(config)));
        }

        // Lazy so an unreachable server surfaces through the probe as 503
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.probe_timeout())
            .connect_lazy(&config.postgres_url)
            .map_err(|e| MarketError::Internal(format!("Invalid PostgreSQL URL: {}", e)))?;

        info!(max_connections = config.max_connections, "PostgreSQL pool configured");

        Ok(Self::with_backend(
            Backend::Postgres(pool),
            ProbeSettings::from(config),
        ))
    }

    pub fn in_memory() -> Self {
        Self::in_memory_with(ProbeSettings::default())
    }

    pub fn in_memory_with(probe: ProbeSettings) -> Self {
        Self::with_backend(
            Backend::InMemory(Arc::new(RwLock::new(MemoryTables::default()))),
            probe,
        )
    }

    fn with_backend(backend: Backend, probe: ProbeSettings) -> Self {
        Self {
            users: UserRepository::new(backend.clone()),
            reports: ReportRepository::new(backend.clone()),
            payments: PaymentRepository::new(backend.clone()),
            backend,
            probe,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.backend, Backend::InMemory(_))
    }

    pub async fn init_schema(&self) -> MarketResult<()> {
        let Backend::Postgres(pool) = &self.backend else {
            return Ok(());
        };

        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS market")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market.users (
                id UUID PRIMARY KEY,
                email VARCHAR(255) NOT NULL UNIQUE,
                credits BIGINT NOT NULL DEFAULT 0 CHECK (credits >= 0),
                manual_credits INTEGER NOT NULL DEFAULT 0
                    CHECK (manual_credits BETWEEN 0 AND 10000),
                trust_score INTEGER NOT NULL DEFAULT 100 CHECK (trust_score <= 100),
                role VARCHAR(16) NOT NULL DEFAULT 'user',
                is_banned BOOLEAN NOT NULL DEFAULT FALSE,
                ban_reason TEXT,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market.reports (
                id UUID PRIMARY KEY,
                reporter_id UUID NOT NULL REFERENCES market.users(id),
                reported_id UUID NOT NULL REFERENCES market.users(id),
                reason TEXT NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                admin_notes TEXT,
                reviewed_by UUID REFERENCES market.users(id),
                reviewed_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market.processed_payments (
                intent_id VARCHAR(255) PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES market.users(id),
                credits BIGINT NOT NULL,
                source VARCHAR(16) NOT NULL,
                processed_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reports_status ON market.reports(status, created_at)",
        )
        .execute(pool)
        .await?;

        info!("Database schema initialized");
        Ok(())
    }

    /// Single reachability check bounded by the probe timeout
    pub async fn test_connection(&self) -> MarketResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                match tokio::time::timeout(self.probe.timeout, sqlx::query("SELECT 1").execute(pool))
                    .await
                {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(MarketError::Unavailable(format!(
                        "database probe failed: {}",
                        e
                    ))),
                    Err(_) => Err(MarketError::Unavailable(format!(
                        "database probe timed out after {:?}",
                        self.probe.timeout
                    ))),
                }
            }
            Backend::InMemory(_) => Ok(()),
        }
    }

    /// Check reachability with the configured number of attempts
    pub async fn ensure_available(&self) -> MarketResult<()> {
        self.with_retry(|| self.test_connection()).await
    }

    /// Run `operation` up to the configured number of attempts with a fixed
    /// delay in between. Only `Unavailable` errors are retried.
    pub async fn with_retry<F, Fut, T>(&self, operation: F) -> MarketResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = MarketResult<T>>,
    {
        retry_unavailable(self.probe, operation).await
    }

    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    pub fn reports(&self) -> &ReportRepository {
        &self.reports
    }

    pub fn payments(&self) -> &PaymentRepository {
        &self.payments
    }
}

pub(crate) async fn retry_unavailable<F, Fut, T>(probe: ProbeSettings, operation: F) -> MarketResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = MarketResult<T>>,
{
    let attempts = probe.attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Err(MarketError::Unavailable(reason)) if attempt < attempts => {
                debug!(attempt, attempts, reason = %reason, "Database unavailable, retrying");
                tokio::time::sleep(probe.delay).await;
                attempt += 1;
            }
            Err(MarketError::Unavailable(reason)) => {
                warn!(attempts, reason = %reason, "Database unavailable after retries");
                return Err(MarketError::Unavailable(reason));
            }
            other => return other,
        }
    }
}
