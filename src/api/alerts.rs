//! Admin alert inbox and blacklisted-user lookup.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::alerts::{self, AdminAlert};
use crate::db::users;
use crate::models::UserDisputeStats;

#[utoipa::path(
    get,
    path = "/admin_alerts",
    responses((status = 200, body = Vec<AdminAlert>)),
)]
pub async fn list_alerts(State(state): State<AppState>) -> Result<Json<Vec<AdminAlert>>, ApiError> {
    let pool = state.db_pool.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<AdminAlert>, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(alerts::list_unacknowledged(&conn)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(rows))
}

#[utoipa::path(
    post,
    path = "/admin_alerts/{id}/acknowledge",
    params(("id" = i64, Path, description = "Alert id")),
    responses((status = 204)),
)]
pub async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    let pool = state.db_pool.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(alerts::acknowledge(&conn, id)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/users",
    responses((status = 200, body = Vec<UserDisputeStats>)),
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserDisputeStats>>, ApiError> {
    let pool = state.db_pool.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<UserDisputeStats>, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(users::list_all(&conn)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(rows))
}
