//! Arbiter-facing dispute resolution endpoints.

use axum::extract::{Path, State};
use axum::Json;
use log::info;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::deals;
use crate::dispute;
use crate::models::{Deal, DealStatus, DisputeOutcome};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveDisputeRequest {
    pub winner: DisputeOutcome,
    pub reason: String,
}

/// Commits the arbiter's decision. Idempotent on an already-resolved
/// dispute: returns the deal's current state rather than erroring.
#[utoipa::path(
    post,
    path = "/disputes/{id}/resolve",
    params(("id" = Uuid, Path, description = "Deal id")),
    request_body = ResolveDisputeRequest,
    responses((status = 200, body = Deal)),
)]
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveDisputeRequest>,
) -> Result<Json<Deal>, ApiError> {
    let pool = state.db_pool.clone();
    let deal = tokio::task::spawn_blocking(move || -> Result<Deal, ApiError> {
        let mut conn = pool.get().map_err(crate::db::StoreError::from)?;
        let current = deals::get_deal(&conn, id)?.ok_or_else(|| ApiError::NotFound(format!("deal {id}")))?;
        if current.status != DealStatus::Disputed || current.pending_key_validation.is_some() {
            // Idempotent: a retried request against a dispute that's already
            // been ruled on (awaiting key validation) or resolved just sees
            // the current state, not an error or a second ruling.
            return Ok(current);
        }

        let resolution = dispute::resolve(&mut conn, id, req.winner, &req.reason)?;
        info!(deal_id = %id, winner = %resolution.winner_id, autobanned = resolution.loser_autobanned; "dispute resolved");
        Ok(resolution.deal)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(deal))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelDisputeRequest {
    pub reason: String,
}

#[utoipa::path(
    post,
    path = "/disputes/{id}/cancel",
    params(("id" = Uuid, Path, description = "Deal id")),
    request_body = CancelDisputeRequest,
    responses((status = 200, body = Deal)),
)]
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelDisputeRequest>,
) -> Result<Json<Deal>, ApiError> {
    let pool = state.db_pool.clone();
    let deal = tokio::task::spawn_blocking(move || -> Result<Deal, ApiError> {
        let mut conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(dispute::cancel(&mut conn, id, "arbiter", &req.reason)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(deal))
}
