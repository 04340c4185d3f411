use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{ApiJson, ApiPath};
use super::MarketApiState;
use crate::auth::CurrentUser;
use crate::error::MarketResult;
use crate::moderation::Report;

#[derive(Debug, Deserialize)]
pub struct FileReportRequest {
    pub reported_id: Uuid,
    pub reason: String,
}

pub async fn file_report(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<FileReportRequest>,
) -> MarketResult<(StatusCode, Json<Report>)> {
    let report = state
        .moderation
        .file_report(&user, req.reported_id, &req.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn get_report(
    State(state): State<MarketApiState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> MarketResult<Json<Report>> {
    Ok(Json(state.moderation.get_report(&user, id).await?))
}
