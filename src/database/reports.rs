//! Report Repository - moderation reports and their single status transition

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::pool::Backend;
use crate::error::{MarketError, MarketResult};
use crate::moderation::{PenaltyPolicy, Report, ReportStatus, ReviewOutcome, TrustPenalty};

const REPORT_COLUMNS: &str = "id, reporter_id, reported_id, reason, status, admin_notes, \
                              reviewed_by, reviewed_at, created_at";

fn report_from_row(row: &PgRow) -> MarketResult<Report> {
    let status: String = row.try_get("status")?;
    Ok(Report {
        id: row.try_get("id")?,
        reporter_id: row.try_get("reporter_id")?,
        reported_id: row.try_get("reported_id")?,
        reason: row.try_get("reason")?,
        status: ReportStatus::parse(&status)
            .map_err(|_| MarketError::Internal(format!("Unknown report status: {}", status)))?,
        admin_notes: row.try_get("admin_notes")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Review request handed to the store
#[derive(Debug, Clone)]
pub struct ReviewRecord<'a> {
    pub report_id: Uuid,
    pub target: ReportStatus,
    pub reviewer_id: Uuid,
    pub admin_notes: Option<&'a str>,
    pub penalty: TrustPenalty,
}

pub struct ReportRepository {
    backend: Backend,
}

impl ReportRepository {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn insert_report(&self, report: &Report) -> MarketResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO market.reports
                    (id, reporter_id, reported_id, reason, status, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(report.id)
                .bind(report.reporter_id)
                .bind(report.reported_id)
                .bind(&report.reason)
                .bind(report.status.as_str())
                .bind(report.created_at)
                .execute(pool)
                .await?;
            }
            Backend::InMemory(tables) => {
                tables.write().await.reports.insert(report.id, report.clone());
            }
        }

        debug!(report_id = %report.id, reported_id = %report.reported_id, "Report filed");
        Ok(())
    }

    pub async fn get_report(&self, id: Uuid) -> MarketResult<Option<Report>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(&format!(
                    "SELECT {} FROM market.reports WHERE id = $1",
                    REPORT_COLUMNS
                ))
                .bind(id)
                .fetch_optional(pool)
                .await?;

                row.as_ref().map(report_from_row).transpose()
            }
            Backend::InMemory(tables) => Ok(tables.read().await.reports.get(&id).cloned()),
        }
    }

    /// List reports, newest first, optionally filtered by status
    pub async fn list_reports(&self, status: Option<ReportStatus>) -> MarketResult<Vec<Report>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let rows = sqlx::query(&format!(
                    r#"
                    SELECT {} FROM market.reports
                    WHERE ($1::TEXT IS NULL OR status = $1)
                    ORDER BY created_at DESC
                    "#,
                    REPORT_COLUMNS
                ))
                .bind(status.map(|s| s.as_str()))
                .fetch_all(pool)
                .await?;

                rows.iter().map(report_from_row).collect()
            }
            Backend::InMemory(tables) => {
                let tables = tables.read().await;
                let mut reports: Vec<Report> = tables
                    .reports
                    .values()
                    .filter(|r| status.map_or(true, |s| r.status == s))
                    .cloned()
                    .collect();
                reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(reports)
            }
        }
    }

    /// Move a pending report to a terminal status. The status flip and the
    /// trust penalty on resolution commit together. A report that is no longer
    /// pending is returned untouched with `already_reviewed` set.
    pub async fn review(&self, record: ReviewRecord<'_>) -> MarketResult<ReviewOutcome> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let mut tx = pool.begin().await?;

                let flipped = sqlx::query(&format!(
                    r#"
                    UPDATE market.reports
                    SET status = $2, admin_notes = $3, reviewed_by = $4, reviewed_at = NOW()
                    WHERE id = $1 AND status = 'pending'
                    RETURNING {}
                    "#,
                    REPORT_COLUMNS
                ))
                .bind(record.report_id)
                .bind(record.target.as_str())
                .bind(record.admin_notes)
                .bind(record.reviewer_id)
                .fetch_optional(&mut *tx)
                .await?;

                let report = match flipped {
                    Some(row) => report_from_row(&row)?,
                    None => {
                        tx.rollback().await?;
                        let existing = self
                            .get_report(record.report_id)
                            .await?
                            .ok_or_else(|| MarketError::not_found("Report not found"))?;
                        return Ok(ReviewOutcome {
                            report: existing,
                            already_reviewed: true,
                            reported_trust_score: None,
                        });
                    }
                };

                let reported_trust_score = if record.target == ReportStatus::Resolved {
                    let penalty_sql = match record.penalty.policy {
                        PenaltyPolicy::Clamp => {
                            "UPDATE market.users SET trust_score = GREATEST(trust_score - $2, 0), \
                             updated_at = NOW() WHERE id = $1 RETURNING trust_score"
                        }
                        PenaltyPolicy::Unbounded => {
                            "UPDATE market.users SET trust_score = trust_score - $2, \
                             updated_at = NOW() WHERE id = $1 RETURNING trust_score"
                        }
                    };

                    let row = sqlx::query(penalty_sql)
                        .bind(report.reported_id)
                        .bind(record.penalty.points)
                        .fetch_optional(&mut *tx)
                        .await?;

                    match row {
                        Some(row) => Some(row.try_get::<i32, _>("trust_score")?),
                        None => None,
                    }
                } else {
                    None
                };

                tx.commit().await?;

                info!(
                    report_id = %report.id,
                    status = report.status.as_str(),
                    reviewer = %record.reviewer_id,
                    "Report reviewed"
                );

                Ok(ReviewOutcome {
                    report,
                    already_reviewed: false,
                    reported_trust_score,
                })
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;

                let report = tables
                    .reports
                    .get_mut(&record.report_id)
                    .ok_or_else(|| MarketError::not_found("Report not found"))?;

                if report.status.is_terminal() {
                    return Ok(ReviewOutcome {
                        report: report.clone(),
                        already_reviewed: true,
                        reported_trust_score: None,
                    });
                }

                report.status = record.target;
                report.admin_notes = record.admin_notes.map(str::to_string);
                report.reviewed_by = Some(record.reviewer_id);
                report.reviewed_at = Some(Utc::now());
                let report = report.clone();

                let reported_trust_score = if record.target == ReportStatus::Resolved {
                    tables.users.get_mut(&report.reported_id).map(|user| {
                        user.trust_score = record.penalty.apply(user.trust_score);
                        user.updated_at = Utc::now();
                        user.trust_score
                    })
                } else {
                    None
                };

                info!(
                    report_id = %report.id,
                    status = report.status.as_str(),
                    reviewer = %record.reviewer_id,
                    "Report reviewed"
                );

                Ok(ReviewOutcome {
                    report,
                    already_reviewed: false,
                    reported_trust_score,
                })
            }
        }
    }
}
