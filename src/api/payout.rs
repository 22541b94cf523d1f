//! Key validation endpoint: the hand-off point between a `key_validation`
//! Session (opened by the Deadline Monitor or the Dispute engine) and the
//! Payout Pipeline. A winning party posts the private key matching their
//! ephemeral signer address; once it checks out, the deal's `pendingKeyValidation`
//! tag tells us which side is paid and which terminal event applies.

use axum::extract::{Path, State};
use axum::Json;
use log::{info, warn};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::{deals, sessions, wallets};
use crate::key_validation::{self, MAX_KEY_VALIDATION_ATTEMPTS};
use crate::models::{Deal, PendingKeyValidation, TransactionKind};
use crate::payout::{self, PayoutRequest};
use crate::state_machine::DealEvent;

#[derive(Debug, Deserialize, ToSchema)]
pub struct KeyValidationRequest {
    pub session_id: Uuid,
    pub candidate_private_key: String,
}

/// Validates the candidate key against the session's party and, on a match,
/// runs the Payout Pipeline to completion. On mismatch, bumps the session's
/// attempt counter and invalidates it once the budget is exhausted.
#[utoipa::path(
    post,
    path = "/deals/{id}/key_validation",
    params(("id" = Uuid, Path, description = "Deal id")),
    request_body = KeyValidationRequest,
    responses((status = 200, body = Deal), (status = 400), (status = 404)),
)]
pub async fn submit_key(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<KeyValidationRequest>,
) -> Result<Json<Deal>, ApiError> {
    let pool = state.db_pool.clone();
    let session_id = req.session_id;
    let (deal, tag, recipient_address) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;

        let deal = deals::get_deal(&conn, id)?.ok_or_else(|| ApiError::NotFound(format!("deal {id}")))?;
        let wallet = wallets::get_wallet_for_deal(&conn, id)?
            .ok_or_else(|| ApiError::InvalidRequest("deal has no multisig wallet".into()))?;
        let tag = deal
            .pending_key_validation
            .ok_or_else(|| ApiError::InvalidRequest("deal has no pending key validation".into()))?;

        let session = sessions::find_valid(&conn, session_id, "key_validation")?
            .ok_or_else(|| ApiError::InvalidRequest("key validation session expired or not found".into()))?;
        if session.deal_id != id {
            return Err(ApiError::InvalidRequest("session does not belong to this deal".into()));
        }

        // `signer_address` is the ephemeral multisig-signer address the
        // candidate key is validated against (never persisted past the
        // original reveal); `payout_address` is the party's registered
        // destination for the actual USDT transfer. They are not the same
        // thing: the signer key authorizes the multisig transaction, it
        // isn't where funds go.
        let (expected_party, signer_address, payout_address) = match tag {
            PendingKeyValidation::SellerRelease | PendingKeyValidation::DisputeSeller => {
                (&deal.seller_id, &wallet.seller_key_addr, &deal.seller_payout_address)
            },
            PendingKeyValidation::BuyerRefund | PendingKeyValidation::DisputeBuyer => {
                (&deal.buyer_id, &wallet.buyer_key_addr, &deal.buyer_payout_address)
            },
        };
        if &session.user_id != expected_party {
            return Err(ApiError::InvalidRequest("session does not match the expected party for this deal".into()));
        }

        if let Err(e) = key_validation::validate(&req.candidate_private_key, signer_address) {
            let attempts = sessions::bump_attempt(&conn, session_id)?;
            if attempts >= MAX_KEY_VALIDATION_ATTEMPTS {
                sessions::invalidate(&conn, session_id)?;
                warn!(deal_id = %id, session_id = %session_id; "key validation attempts exhausted, session invalidated");
            }
            return Err(e.into());
        }

        Ok((deal, tag, payout_address.clone()))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let terminal_event = match tag {
        PendingKeyValidation::SellerRelease => DealEvent::DeadlineReachedAutoRelease,
        PendingKeyValidation::BuyerRefund => DealEvent::DeadlineGraceExpiredAutoRefund,
        PendingKeyValidation::DisputeSeller => DealEvent::ArbiterRulesForSeller,
        PendingKeyValidation::DisputeBuyer => DealEvent::ArbiterRulesForBuyer,
    };
    let payout_kind = match tag {
        PendingKeyValidation::SellerRelease | PendingKeyValidation::DisputeSeller => TransactionKind::Payout,
        PendingKeyValidation::BuyerRefund | PendingKeyValidation::DisputeBuyer => TransactionKind::Refund,
    };

    let mut conn = state.db_pool.get().map_err(crate::db::StoreError::from)?;
    let result = payout::run(
        &mut conn,
        &state.chain,
        &state.price_feed,
        state.rental.as_deref(),
        PayoutRequest {
            deal_id: id,
            recipient_address: &recipient_address,
            net_amount: deal.payout_amount(),
            commission: deal.commission(),
            commission_wallet: &state.commission_wallet,
            arbiter_address: &state.arbiter_address,
            recipient_signing_key: &req.candidate_private_key,
            terminal_event,
            payout_kind,
        },
    )
    .await?;

    let pool = state.db_pool.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let conn = pool.get().map_err(crate::db::StoreError::from)?;
        sessions::invalidate(&conn, session_id)?;
        Ok(())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(deal_id = %id, tag:? = tag; "key validated, payout pipeline completed");
    Ok(Json(result))
}
