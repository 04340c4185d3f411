use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::moderation::{PenaltyPolicy, TrustPenalty};

/// Configuration for the marketplace ledger service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Request limits
    pub security: SecurityConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Session token configuration
    pub auth: AuthConfig,
    /// Payment provider configuration
    pub payments: PaymentsConfig,
    /// Moderation penalties
    pub moderation: ModerationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Email of an admin account ensured at startup
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Rate limit per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Honour X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory fallback)
    pub postgres_enabled: bool,
    /// Pool size
    pub max_connections: u32,
    /// Connection probe attempts before surfacing 503
    pub probe_attempts: u32,
    /// Timeout for a single probe
    pub probe_timeout_ms: u64,
    /// Pause between probe attempts
    pub probe_delay_ms: u64,
}

impl DatabaseConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret for session tokens
    pub jwt_secret: String,
    /// Session lifetime
    pub token_ttl_hours: i64,
    /// Cookie carrying the session token
    pub cookie_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Provider REST base URL
    pub provider_url: String,
    /// Provider secret key, used to look up payment intents
    pub secret_key: String,
    /// Shared secret for webhook signatures
    pub webhook_secret: String,
    /// Maximum age of a signed webhook
    pub webhook_tolerance_secs: i64,
    /// Provider request timeout
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Trust points removed when a report is resolved
    pub trust_penalty: i32,
    /// Whether penalties stop at zero
    pub penalty_policy: PenaltyPolicy,
}

impl ModerationConfig {
    pub fn to_penalty(&self) -> TrustPenalty {
        TrustPenalty {
            points: self.trust_penalty,
            policy: self.penalty_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug)
    pub level: String,
    /// Enable log sanitization to prevent sensitive data exposure
    pub sanitize_logs: bool,
    /// Enable request/response logging
    pub log_requests: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/marketplace".to_string(),
            postgres_enabled: false,
            max_connections: 10,
            probe_attempts: 3,
            probe_timeout_ms: 2000,
            probe_delay_ms: 250,
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            trust_penalty: crate::moderation::RESOLVED_REPORT_PENALTY,
            penalty_policy: PenaltyPolicy::Clamp,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            security: SecurityConfig {
                rate_limit_per_minute: 120,
                max_request_size: 64 * 1024,
                trust_proxy_headers: false,
            },
            database: DatabaseConfig::default(),
            auth: AuthConfig {
                jwt_secret: String::new(), // MUST be configured
                token_ttl_hours: 24 * 7,
                cookie_name: "token".to_string(),
            },
            payments: PaymentsConfig {
                provider_url: "https://api.stripe.com".to_string(),
                secret_key: String::new(),
                webhook_secret: String::new(),
                webhook_tolerance_secs: 300,
                timeout_secs: 10,
            },
            moderation: ModerationConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                sanitize_logs: true,
                log_requests: true,
            },
            bootstrap_admin_email: None,
        }
    }
}

impl MarketConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server
        if let Ok(host) = env::var("MARKET_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = env::var("MARKET_PORT") {
            config.server.port = port.parse().context("Invalid MARKET_PORT value")?;
        }

        // Security
        if let Ok(rate_limit) = env::var("MARKET_RATE_LIMIT_PER_MINUTE") {
            config.security.rate_limit_per_minute = rate_limit
                .parse()
                .context("Invalid MARKET_RATE_LIMIT_PER_MINUTE value")?;
        }

        if let Ok(size) = env::var("MARKET_MAX_REQUEST_SIZE") {
            config.security.max_request_size =
                size.parse().context("Invalid MARKET_MAX_REQUEST_SIZE value")?;
        }

        if let Ok(trust) = env::var("MARKET_TRUST_PROXY_HEADERS") {
            config.security.trust_proxy_headers = trust
                .parse()
                .context("Invalid MARKET_TRUST_PROXY_HEADERS value")?;
        }

        // Database
        if let Ok(url) = env::var("MARKET_POSTGRES_URL") {
            config.database.postgres_url = url;
        }

        if let Ok(enabled) = env::var("MARKET_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("Invalid MARKET_POSTGRES_ENABLED value")?;
        }

        if let Ok(max) = env::var("MARKET_DB_MAX_CONNECTIONS") {
            config.database.max_connections =
                max.parse().context("Invalid MARKET_DB_MAX_CONNECTIONS value")?;
        }

        if let Ok(attempts) = env::var("MARKET_DB_PROBE_ATTEMPTS") {
            config.database.probe_attempts = attempts
                .parse()
                .context("Invalid MARKET_DB_PROBE_ATTEMPTS value")?;
        }

        if let Ok(timeout) = env::var("MARKET_DB_PROBE_TIMEOUT_MS") {
            config.database.probe_timeout_ms = timeout
                .parse()
                .context("Invalid MARKET_DB_PROBE_TIMEOUT_MS value")?;
        }

        if let Ok(delay) = env::var("MARKET_DB_PROBE_DELAY_MS") {
            config.database.probe_delay_ms = delay
                .parse()
                .context("Invalid MARKET_DB_PROBE_DELAY_MS value")?;
        }

        // Auth
        config.auth.jwt_secret = env::var("MARKET_JWT_SECRET")
            .context("MARKET_JWT_SECRET environment variable is required")?;

        if let Ok(ttl) = env::var("MARKET_TOKEN_TTL_HOURS") {
            config.auth.token_ttl_hours =
                ttl.parse().context("Invalid MARKET_TOKEN_TTL_HOURS value")?;
        }

        if let Ok(name) = env::var("MARKET_COOKIE_NAME") {
            config.auth.cookie_name = name;
        }

        // Payments
        if let Ok(url) = env::var("MARKET_PAYMENT_PROVIDER_URL") {
            config.payments.provider_url = url;
        }

        config.payments.secret_key = env::var("MARKET_PAYMENT_SECRET_KEY")
            .context("MARKET_PAYMENT_SECRET_KEY environment variable is required")?;

        config.payments.webhook_secret = env::var("MARKET_PAYMENT_WEBHOOK_SECRET")
            .context("MARKET_PAYMENT_WEBHOOK_SECRET environment variable is required")?;

        if let Ok(tolerance) = env::var("MARKET_PAYMENT_WEBHOOK_TOLERANCE_SECS") {
            config.payments.webhook_tolerance_secs = tolerance
                .parse()
                .context("Invalid MARKET_PAYMENT_WEBHOOK_TOLERANCE_SECS value")?;
        }

        if let Ok(timeout) = env::var("MARKET_PAYMENT_TIMEOUT_SECS") {
            config.payments.timeout_secs = timeout
                .parse()
                .context("Invalid MARKET_PAYMENT_TIMEOUT_SECS value")?;
        }

        // Moderation
        if let Ok(penalty) = env::var("MARKET_TRUST_PENALTY") {
            config.moderation.trust_penalty =
                penalty.parse().context("Invalid MARKET_TRUST_PENALTY value")?;
        }

        if let Ok(policy) = env::var("MARKET_TRUST_PENALTY_POLICY") {
            config.moderation.penalty_policy = parse_penalty_policy(&policy)?;
        }

        // Logging
        if let Ok(log_level) = env::var("MARKET_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        if let Ok(sanitize_logs) = env::var("MARKET_SANITIZE_LOGS") {
            config.logging.sanitize_logs = sanitize_logs
                .parse()
                .context("Invalid MARKET_SANITIZE_LOGS value")?;
        }

        if let Ok(log_requests) = env::var("MARKET_LOG_REQUESTS") {
            config.logging.log_requests = log_requests
                .parse()
                .context("Invalid MARKET_LOG_REQUESTS value")?;
        }

        config.bootstrap_admin_email = env::var("MARKET_BOOTSTRAP_ADMIN_EMAIL")
            .ok()
            .filter(|email| !email.trim().is_empty());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT secret is too short (minimum 32 characters for security)"
            ));
        }

        if self.auth.token_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("Token lifetime must be positive"));
        }

        if self.auth.cookie_name.is_empty() {
            return Err(anyhow::anyhow!("Cookie name cannot be empty"));
        }

        if self.payments.secret_key.is_empty() {
            return Err(anyhow::anyhow!("Payment provider secret key is required"));
        }

        if self.payments.webhook_secret.is_empty() {
            return Err(anyhow::anyhow!("Payment webhook secret is required"));
        }

        if self.payments.webhook_tolerance_secs <= 0 {
            return Err(anyhow::anyhow!("Webhook tolerance must be positive"));
        }

        let provider = url::Url::parse(&self.payments.provider_url)
            .context("Payment provider URL is not a valid URL")?;
        if provider.scheme() != "https" {
            return Err(anyhow::anyhow!(
                "Payment provider URL must use HTTPS: {}",
                self.payments.provider_url
            ));
        }

        if self.database.probe_attempts == 0 {
            return Err(anyhow::anyhow!("Database probe attempts must be at least 1"));
        }

        if self.database.postgres_enabled && self.database.postgres_url.is_empty() {
            return Err(anyhow::anyhow!(
                "PostgreSQL is enabled but no connection string is configured"
            ));
        }

        if !(0..=100).contains(&self.moderation.trust_penalty) {
            return Err(anyhow::anyhow!(
                "Trust penalty must be within 0..=100, got {}",
                self.moderation.trust_penalty
            ));
        }

        Ok(())
    }
}

/// Parse `MARKET_TRUST_PENALTY_POLICY`. Logging is not up yet when this runs;
/// `main` reports an unbounded policy once the subscriber exists.
fn parse_penalty_policy(value: &str) -> Result<PenaltyPolicy> {
    match value.trim().to_lowercase().as_str() {
        "clamp" => Ok(PenaltyPolicy::Clamp),
        "unbounded" => Ok(PenaltyPolicy::Unbounded),
        other => Err(anyhow::anyhow!(
            "Invalid MARKET_TRUST_PENALTY_POLICY value: {} (expected clamp or unbounded)",
            other
        )),
    }
}

/// Sanitize sensitive data for logging
pub fn sanitize_for_logging(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}
