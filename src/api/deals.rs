//! Read-only admin views over deals, their transactions, and audit trail.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::{audit, deals, transactions};
use crate::models::{AuditEntry, Deal, DealStatus, TransactionRecord};

const DEFAULT_PAGE: i64 = 50;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListDealsQuery {
    pub status: Option<DealStatus>,
}

#[utoipa::path(
    get,
    path = "/deals",
    params(ListDealsQuery),
    responses((status = 200, body = Vec<Deal>)),
)]
pub async fn list_deals(State(state): State<AppState>, Query(q): Query<ListDealsQuery>) -> Result<Json<Vec<Deal>>, ApiError> {
    let pool = state.db_pool.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Deal>, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(match q.status {
            Some(status) => deals::list_deals_by_status(&conn, status)?,
            None => deals::list_recent(&conn, DEFAULT_PAGE)?,
        })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/deals/{id}",
    params(("id" = Uuid, Path, description = "Deal id")),
    responses((status = 200, body = Deal), (status = 404)),
)]
pub async fn get_deal(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Deal>, ApiError> {
    let pool = state.db_pool.clone();
    let deal = tokio::task::spawn_blocking(move || -> Result<Option<Deal>, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(deals::get_deal(&conn, id)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??
    .ok_or_else(|| ApiError::NotFound(format!("deal {id}")))?;
    Ok(Json(deal))
}

#[utoipa::path(
    get,
    path = "/deals/{id}/transactions",
    params(("id" = Uuid, Path, description = "Deal id")),
    responses((status = 200, body = Vec<TransactionRecord>)),
)]
pub async fn list_transactions(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let pool = state.db_pool.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<TransactionRecord>, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(transactions::list_for_deal(&conn, id)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/deals/{id}/audit",
    params(("id" = Uuid, Path, description = "Deal id")),
    responses((status = 200, body = Vec<AuditEntry>)),
)]
pub async fn list_audit(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let pool = state.db_pool.clone();
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<AuditEntry>, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        Ok(audit::list_for_deal(&conn, id)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(rows))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DealReceipt {
    pub deal: Deal,
    pub transactions: Vec<TransactionRecord>,
    pub audit_log: Vec<AuditEntry>,
}

#[utoipa::path(
    get,
    path = "/deals/{id}/receipt",
    params(("id" = Uuid, Path, description = "Deal id")),
    responses((status = 200, body = DealReceipt), (status = 404)),
)]
pub async fn export_receipt(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<DealReceipt>, ApiError> {
    let pool = state.db_pool.clone();
    let receipt = tokio::task::spawn_blocking(move || -> Result<DealReceipt, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        let deal = deals::get_deal(&conn, id)?.ok_or_else(|| ApiError::NotFound(format!("deal {id}")))?;
        let transactions = transactions::list_for_deal(&conn, id)?;
        let audit_log = audit::list_for_deal(&conn, id)?;
        Ok(DealReceipt { deal, transactions, audit_log })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(receipt))
}
