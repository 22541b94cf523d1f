//! Dispute lifecycle: opening, arbiter resolution, loss-streak autoban.
//!
//! Grounded on the same transactional discipline as `db::deals::apply_transition`
//! (status precondition + audit row in one commit); dispute-specific effects
//! (stats, session, notice) are sequenced around that call rather than folded
//! into it, so a mid-sequence failure never leaves the deal's own status
//! inconsistent.

use chrono::Duration;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::db::error::StoreError;
use crate::db::{audit, deals, error::StoreResult, sessions, users};
use crate::models::{Deal, DealStatus, DisputeOutcome, PendingKeyValidation, Session, UserDisputeStats};
use crate::state_machine::DealEvent;

const MIN_REASON_LEN: usize = 20;
const KEY_VALIDATION_TTL_HOURS: i64 = 24;
const AUTOBAN_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum DisputeError {
    #[error("dispute reason must be at least {MIN_REASON_LEN} characters")]
    ReasonTooShort,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn open(conn: &mut Connection, deal_id: Uuid, opener_id: &str, reason: &str) -> Result<Deal, DisputeError> {
    if reason.trim().len() < MIN_REASON_LEN {
        return Err(DisputeError::ReasonTooShort);
    }

    let current = deals::get_deal(conn, deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {deal_id}")))?;
    let deal = deals::apply_transition(
        conn,
        deal_id,
        current.version,
        DealEvent::DisputeOpened,
        opener_id,
        &format!("dispute opened: {reason}"),
    )?;

    Ok(deal)
}

pub struct Resolution {
    pub deal: Deal,
    pub winner_id: String,
    pub loser_id: String,
    pub loser_stats: UserDisputeStats,
    pub loser_autobanned: bool,
    pub key_validation_session: Session,
}

/// Commits the arbiter's decision: updates win/loss streaks (autobanning the
/// loser at three consecutive losses) and opens a `key_validation` session
/// for the winner. The deal stays `Disputed` — it only reaches
/// `ResolvedBuyer`/`ResolvedSeller` once the Payout Pipeline clears, driven
/// by the winner supplying the matching key through that session.
pub fn resolve(
    conn: &mut Connection,
    deal_id: Uuid,
    winner: DisputeOutcome,
    reason: &str,
) -> Result<Resolution, DisputeError> {
    let current = deals::get_deal(conn, deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {deal_id}")))?;
    if current.status != DealStatus::Disputed {
        return Err(StoreError::InvalidTransition(format!("deal {deal_id} is not under dispute")).into());
    }

    let (winner_id, loser_id, pkv) = match winner {
        DisputeOutcome::Buyer => (current.buyer_id.clone(), current.seller_id.clone(), PendingKeyValidation::DisputeBuyer),
        DisputeOutcome::Seller => (current.seller_id.clone(), current.buyer_id.clone(), PendingKeyValidation::DisputeSeller),
    };

    audit::record_note(conn, deal_id, DealStatus::Disputed, "arbiter", &format!("ruled for {winner_id}: {reason}"))?;

    let winner_stats = users::record_outcome(conn, &winner_id, true)?;
    let loser_stats = users::record_outcome(conn, &loser_id, false)?;
    let loser_autobanned = loser_stats.blacklisted;
    let _ = winner_stats;

    deals::set_pending_key_validation(conn, deal_id, pkv)?;
    let key_validation_session =
        sessions::create_session(conn, deal_id, &winner_id, "key_validation", Duration::hours(KEY_VALIDATION_TTL_HOURS))?;
    let deal = deals::get_deal(conn, deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {deal_id}")))?;

    Ok(Resolution { deal, winner_id, loser_id, loser_stats, loser_autobanned, key_validation_session })
}

/// Aborts an open dispute back to `Funded`, the only legal prior state a
/// dispute can be opened from in this model.
pub fn cancel(conn: &mut Connection, deal_id: Uuid, actor: &str, reason: &str) -> StoreResult<Deal> {
    let current = deals::get_deal(conn, deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {deal_id}")))?;
    if current.status != DealStatus::Disputed {
        // Idempotent on already-resolved disputes: return current state rather than error.
        return Ok(current);
    }
    deals::apply_transition(conn, deal_id, current.version, DealEvent::DisputeCancelled, actor, reason)
        .map_err(Into::into)
}
