//! Marketplace Ledger
//!
//! Credit ledger and moderation backend for a peer-to-peer marketplace.
//! Users buy credits through a payment provider, staff review abuse reports,
//! and resolved reports cost the reported user trust.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── error.rs       - Error type and HTTP mapping
//! ├── ledger/        - Credit balance changes
//! │   ├── source.rs  - Who may change a balance
//! │   └── manager.rs - Increments, manual grants, payment settlement
//! ├── moderation/    - Report state machine
//! │   ├── report.rs  - Report, status, trust penalty
//! │   ├── manager.rs - Filing and reviewing reports
//! │   └── admin.rs   - Ban, unban, role and trust actions
//! ├── payments/      - Payment provider integration
//! │   ├── gateway.rs - Payment intent lookups
//! │   └── webhook.rs - Webhook signature verification
//! ├── auth/          - Session tokens and request extractors
//! ├── api/           - HTTP API endpoints and middleware
//! └── database/      - PostgreSQL persistence with in-memory fallback
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod moderation;
pub mod payments;

// Re-export main types for convenience
pub use config::MarketConfig;
pub use database::{Balance, DatabasePool, PaymentOutcome, PaymentSource, Role, User};
pub use error::{MarketError, MarketResult};
pub use ledger::{CreditLedger, CreditSource};
pub use moderation::{
    ModerationManager, PenaltyPolicy, Report, ReportStatus, ReviewDecision, ReviewOutcome,
    TrustPenalty, UserAction,
};
pub use payments::{PaymentGateway, PaymentIntent, ProviderGateway, WebhookVerifier};

// Re-export API types
pub use api::{create_app, create_router, MarketApiState, SecurityMiddlewareConfig, SecurityState};
