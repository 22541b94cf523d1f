//! API error types and HTTP response conversion.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{error, warn};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::StoreError;
use crate::dispute::DisputeError;
use crate::key_validation::KeyValidationError;
use crate::payout::PayoutError;

#[derive(Debug, Error, ToSchema)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::InvalidTransition(msg) | StoreError::InvalidInput(msg) => ApiError::InvalidRequest(msg),
            StoreError::Conflict(id) => ApiError::InvalidRequest(format!("deal {id} was modified concurrently, retry")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DisputeError> for ApiError {
    fn from(err: DisputeError) -> Self {
        match err {
            DisputeError::ReasonTooShort => ApiError::InvalidRequest(err.to_string()),
            DisputeError::Store(e) => e.into(),
        }
    }
}

impl From<KeyValidationError> for ApiError {
    fn from(err: KeyValidationError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl From<PayoutError> for ApiError {
    fn from(err: PayoutError) -> Self {
        match err {
            PayoutError::Chain(e) => ApiError::Internal(e.to_string()),
            PayoutError::Store(e) => e.into(),
            PayoutError::BroadcastFailed(msg) => ApiError::Internal(format!("payout broadcast failed: {msg}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => {
                warn!("API: unauthorized request");
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            },
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.clone()),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(detail) => {
                let incident = uuid::Uuid::new_v4();
                error!(incident = %incident, error = detail.as_str(); "API: internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("internal error, incident id {incident}"))
            },
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
