//! Staff endpoints: report queue, reviews, user actions and manual grants

use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::MarketApiState;
use crate::auth::CurrentUser;
use crate::database::{Balance, User};
use crate::error::MarketResult;
use crate::moderation::{Report, ReportStatus, ReviewDecision, ReviewOutcome, UserAction};

#[derive(Debug, Default, Deserialize)]
pub struct ListReportsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    pub amount: i64,
}

pub async fn list_reports(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<ListReportsQuery>,
) -> MarketResult<Json<Vec<Report>>> {
    let status = query
        .status
        .as_deref()
        .map(ReportStatus::parse)
        .transpose()?;

    Ok(Json(state.moderation.list_reports(&user, status).await?))
}

pub async fn review_report(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> MarketResult<Json<ReviewOutcome>> {
    let outcome = state
        .moderation
        .review(&user, id, req.decision, req.admin_notes.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub async fn user_action(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(action): ApiJson<UserAction>,
) -> MarketResult<Json<User>> {
    Ok(Json(
        state.moderation.apply_user_action(&user, id, action).await?,
    ))
}

pub async fn grant_credits(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<GrantCreditsRequest>,
) -> MarketResult<Json<Balance>> {
    Ok(Json(state.ledger.grant_manual(&user, id, req.amount).await?))
}
