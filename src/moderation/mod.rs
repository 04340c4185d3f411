//! Moderation
//!
//! Reports move `pending -> resolved | dismissed` exactly once. Resolving a
//! report lowers the reported user's trust score in the same store operation
//! that flips the status. Bans live on the user and are managed separately
//! through [`UserAction`].

pub mod admin;
mod manager;
mod report;

pub use admin::UserAction;
pub use manager::ModerationManager;
pub use report::{
    PenaltyPolicy, Report, ReportStatus, ReviewDecision, ReviewOutcome, TrustPenalty,
    MAX_REASON_LEN, MAX_TRUST_SCORE, RESOLVED_REPORT_PENALTY,
};
