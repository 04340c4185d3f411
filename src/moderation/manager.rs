//! Moderation manager - filing and reviewing reports

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::report::{
    Report, ReportStatus, ReviewDecision, ReviewOutcome, TrustPenalty, MAX_REASON_LEN,
};
use crate::database::{DatabasePool, ReviewRecord, Role, User};
use crate::error::{MarketError, MarketResult};

pub struct ModerationManager {
    pub(super) db: Arc<DatabasePool>,
    penalty: TrustPenalty,
}

impl ModerationManager {
    pub fn new(db: Arc<DatabasePool>, penalty: TrustPenalty) -> Self {
        Self { db, penalty }
    }

    pub fn penalty(&self) -> TrustPenalty {
        self.penalty
    }

    pub async fn file_report(
        &self,
        reporter: &User,
        reported_id: Uuid,
        reason: &str,
    ) -> MarketResult<Report> {
        if reporter.is_banned {
            return Err(MarketError::forbidden("Account is banned"));
        }

        if reporter.id == reported_id {
            return Err(MarketError::validation("Cannot report yourself"));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(MarketError::validation("Reason is required"));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(MarketError::validation(format!(
                "Reason must be at most {} characters",
                MAX_REASON_LEN
            )));
        }

        if self.db.users().get_user(reported_id).await?.is_none() {
            return Err(MarketError::not_found("Reported user not found"));
        }

        let report = Report::new(reporter.id, reported_id, reason.to_string());
        self.db.reports().insert_report(&report).await?;

        info!(
            report_id = %report.id,
            reporter_id = %reporter.id,
            reported_id = %reported_id,
            "Report filed"
        );

        Ok(report)
    }

    /// Staff see every report; reporters see their own.
    pub async fn get_report(&self, caller: &User, id: Uuid) -> MarketResult<Report> {
        let report = self
            .db
            .reports()
            .get_report(id)
            .await?
            .ok_or_else(|| MarketError::not_found("Report not found"))?;

        if !caller.role.is_staff() && caller.id != report.reporter_id {
            return Err(MarketError::forbidden("Not allowed to view this report"));
        }

        Ok(report)
    }

    pub async fn list_reports(
        &self,
        caller: &User,
        status: Option<ReportStatus>,
    ) -> MarketResult<Vec<Report>> {
        require_staff(caller)?;
        self.db.reports().list_reports(status).await
    }

    pub async fn review(
        &self,
        caller: &User,
        report_id: Uuid,
        decision: ReviewDecision,
        admin_notes: Option<&str>,
    ) -> MarketResult<ReviewOutcome> {
        require_staff(caller)?;

        let admin_notes = admin_notes.map(str::trim).filter(|notes| !notes.is_empty());
        if let Some(notes) = admin_notes {
            if notes.chars().count() > MAX_REASON_LEN {
                return Err(MarketError::validation(format!(
                    "Admin notes must be at most {} characters",
                    MAX_REASON_LEN
                )));
            }
        }

        let report = self
            .db
            .reports()
            .get_report(report_id)
            .await?
            .ok_or_else(|| MarketError::not_found("Report not found"))?;

        if report.reported_id == caller.id {
            warn!(report_id = %report_id, caller = %caller.id, "Review of own report refused");
            return Err(MarketError::forbidden(
                "Cannot review a report filed against you",
            ));
        }

        // Same rule as user actions: moderators handle regular users only
        if caller.role != Role::Admin {
            let reported = self.db.users().get_user(report.reported_id).await?;
            if reported.is_some_and(|user| user.role.is_staff()) {
                warn!(report_id = %report_id, caller = %caller.id, "Review of staff report refused");
                return Err(MarketError::forbidden(
                    "Only admins can review reports against staff",
                ));
            }
        }

        let target = decision.target_status();
        let outcome = self
            .db
            .reports()
            .review(ReviewRecord {
                report_id,
                target,
                reviewer_id: caller.id,
                admin_notes,
                penalty: self.penalty,
            })
            .await?;

        if outcome.already_reviewed && outcome.report.status != target {
            warn!(
                report_id = %report_id,
                current = outcome.report.status.as_str(),
                requested = target.as_str(),
                "Conflicting review refused"
            );
            return Err(MarketError::validation(format!(
                "Report is already {}",
                outcome.report.status.as_str()
            )));
        }

        if outcome.already_reviewed {
            info!(report_id = %report_id, status = target.as_str(), "Report already reviewed");
        }

        Ok(outcome)
    }
}

pub(super) fn require_staff(caller: &User) -> MarketResult<()> {
    if caller.is_banned || !caller.role.is_staff() {
        warn!(caller = %caller.id, role = caller.role.as_str(), "Staff action refused");
        return Err(MarketError::forbidden("Moderator or admin role required"));
    }
    Ok(())
}
