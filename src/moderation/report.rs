//! Report Types and Trust Penalties
//!
//! A report starts `pending` and moves exactly once to `resolved` or
//! `dismissed`. Resolution costs the reported user a fixed number of trust
//! points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MarketError;

/// Trust points removed from the reported user when a report is resolved
pub const RESOLVED_REPORT_PENALTY: i32 = 10;

/// Upper bound of the trust score range
pub const MAX_TRUST_SCORE: i32 = 100;

/// Longest accepted report reason
pub const MAX_REASON_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, MarketError> {
        match value {
            "pending" => Ok(ReportStatus::Pending),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(MarketError::validation(format!(
                "Unknown report status: {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Pending)
    }
}

/// Staff decision on a pending report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    #[serde(alias = "resolved")]
    Resolve,
    #[serde(alias = "dismissed")]
    Dismiss,
}

impl ReviewDecision {
    pub fn target_status(&self) -> ReportStatus {
        match self {
            ReviewDecision::Resolve => ReportStatus::Resolved,
            ReviewDecision::Dismiss => ReportStatus::Dismissed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_id: Uuid,
    pub reason: String,
    pub status: ReportStatus,
    pub admin_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(reporter_id: Uuid, reported_id: Uuid, reason: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            reporter_id,
            reported_id,
            reason,
            status: ReportStatus::Pending,
            admin_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// What happens to trust scores that would drop below zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyPolicy {
    /// Stop at zero
    Clamp,
    /// Allow negative scores
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPenalty {
    pub points: i32,
    pub policy: PenaltyPolicy,
}

impl Default for TrustPenalty {
    fn default() -> Self {
        Self {
            points: RESOLVED_REPORT_PENALTY,
            policy: PenaltyPolicy::Clamp,
        }
    }
}

impl TrustPenalty {
    pub fn apply(&self, trust_score: i32) -> i32 {
        let lowered = trust_score.saturating_sub(self.points);
        match self.policy {
            PenaltyPolicy::Clamp => lowered.max(0),
            PenaltyPolicy::Unbounded => lowered,
        }
    }
}

/// Result of a review attempt
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub report: Report,
    /// True when the report had already reached this terminal state
    pub already_reviewed: bool,
    /// Reported user's trust score after a resolution penalty
    pub reported_trust_score: Option<i32>,
}
