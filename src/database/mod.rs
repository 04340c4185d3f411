//! PostgreSQL Database Module
//!
//! Provides persistence for users, moderation reports and processed payments,
//! with an in-memory fallback when PostgreSQL is disabled.

pub mod payments;
pub mod pool;
pub mod reports;
pub mod users;

pub use payments::{PaymentOutcome, PaymentRepository, PaymentSource, ProcessedPayment};
pub use pool::{DatabasePool, ProbeSettings};
pub use reports::{ReportRepository, ReviewRecord};
pub use users::{Balance, Role, User, UserRepository, MAX_MANUAL_CREDITS};
