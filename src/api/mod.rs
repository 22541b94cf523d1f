//! Admin HTTP API.
//!
//! A read-mostly surface over deals, their transactions and audit trail, plus
//! the handful of actions an arbiter operator takes by hand: resolving or
//! cancelling a dispute, acknowledging an alert, and submitting the validated
//! signing key that hands a deal off to the Payout Pipeline. Documented with
//! `utoipa`/`utoipa-swagger-ui`, same as the teacher's wallet API.

pub mod alerts;
pub mod deals;
pub mod disputes;
pub mod error;
pub mod payout;

use std::sync::Arc;

use axum::extract::{FromRef, Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::chain::{ChainClient, PriceFeed};
use crate::db::SqlitePool;
use crate::payout::resource::HttpEnergyRentalProvider;

use error::ApiError;

/// Shared state for every admin API handler.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub chain: Arc<ChainClient>,
    pub price_feed: Arc<PriceFeed>,
    /// `None` disables rental; the Payout Pipeline falls back to a direct
    /// TRX transfer for every deal.
    pub rental: Option<Arc<HttpEnergyRentalProvider>>,
    pub arbiter_address: String,
    pub commission_wallet: String,
    pub admin_token: String,
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.db_pool.clone()
    }
}

/// Rejects any request without `Authorization: Bearer <admin_token>`.
/// Hand-built rather than grounded on a teacher file: none of the example
/// repos carry a bearer-token admin API to imitate.
async fn require_admin_token(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let ok = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == state.admin_token)
        .unwrap_or(false);

    if ok {
        Ok(next.run(req).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        deals::list_deals,
        deals::get_deal,
        deals::list_transactions,
        deals::list_audit,
        deals::export_receipt,
        disputes::resolve,
        disputes::cancel,
        payout::submit_key,
        alerts::list_alerts,
        alerts::acknowledge_alert,
        alerts::list_users,
    ),
    components(
        schemas(
            crate::models::Deal,
            crate::models::DealStatus,
            crate::models::PendingKeyValidation,
            crate::models::TransactionRecord,
            crate::models::TransactionKind,
            crate::models::AuditEntry,
            crate::models::DisputeOutcome,
            crate::models::UserDisputeStats,
            crate::db::alerts::AdminAlert,
            deals::ListDealsQuery,
            deals::DealReceipt,
            disputes::ResolveDisputeRequest,
            disputes::CancelDisputeRequest,
            payout::KeyValidationRequest,
            error::ApiError,
        )
    ),
    tags(
        (name = "escrow-arbiter", description = "2-of-3 multisig USDT escrow admin API"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/deals", get(deals::list_deals))
        .route("/deals/{id}", get(deals::get_deal))
        .route("/deals/{id}/transactions", get(deals::list_transactions))
        .route("/deals/{id}/audit", get(deals::list_audit))
        .route("/deals/{id}/receipt", get(deals::export_receipt))
        .route("/deals/{id}/key_validation", post(payout::submit_key))
        .route("/disputes/{id}/resolve", post(disputes::resolve))
        .route("/disputes/{id}/cancel", post(disputes::cancel))
        .route("/admin_alerts", get(alerts::list_alerts))
        .route("/admin_alerts/{id}/acknowledge", post(alerts::acknowledge_alert))
        .route("/users", get(alerts::list_users))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_token));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
        .merge(admin_routes)
        .with_state(state)
}
