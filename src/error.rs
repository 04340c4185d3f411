//! Service Error Type
//!
//! Every failure is mapped to one of seven categories at the handler boundary.
//! Callers see an HTTP status and a short message; internals are logged.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn status(&self) -> StatusCode {
        match self {
            MarketError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            MarketError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MarketError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        MarketError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        MarketError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MarketError::Validation(msg.into())
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                MarketError::Unavailable(format!("database unreachable: {}", e))
            }
            sqlx::Error::RowNotFound => MarketError::NotFound("row not found".to_string()),
            other => MarketError::Internal(format!("database error: {}", other)),
        }
    }
}

impl From<JsonRejection> for MarketError {
    fn from(rejection: JsonRejection) -> Self {
        // Body limit hits surface while buffering, before any parsing
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return MarketError::PayloadTooLarge;
        }
        MarketError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for MarketError {
    fn from(rejection: PathRejection) -> Self {
        MarketError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for MarketError {
    fn from(rejection: QueryRejection) -> Self {
        MarketError::Validation(rejection.body_text())
    }
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            MarketError::Unauthenticated => "Not authenticated".to_string(),
            MarketError::PayloadTooLarge => "Request body too large".to_string(),
            MarketError::Forbidden(msg)
            | MarketError::NotFound(msg)
            | MarketError::Validation(msg) => msg.clone(),
            MarketError::Unavailable(msg) => {
                error!("Service unavailable: {}", msg);
                "Service temporarily unavailable".to_string()
            }
            MarketError::Internal(msg) => {
                error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
