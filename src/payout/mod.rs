//! Payout Pipeline: resource provisioning -> recipient payout -> commission
//! transfer -> TRX sweep -> cost accounting -> terminal transition.
//!
//! Each step is logged and its Transaction row is the idempotency record,
//! mirroring the teacher's `TransactionMonitor::rebroadcast_completed_transactions`
//! discipline of tracking broadcast attempts against terminal states rather
//! than trusting in-memory state across a crash.

pub mod resource;

use std::time::Duration;

use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::chain::{ChainClient, ChainError, PriceFeed};
use crate::db::{alerts, deals, error::StoreError, transactions};
use crate::models::{Deal, MicroUsdt, TransactionKind};
use crate::payout::resource::{EnergyRentalProvider, ResourceMethod};
use crate::state_machine::DealEvent;

const TRX_RESERVE_SUN: i64 = 1_000_000; // keep 1 TRX in the multisig as a reserve
const SWEEP_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("recipient payout broadcast failed: {0}")]
    BroadcastFailed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationalCosts {
    pub resource_method: &'static str,
    pub rental_cost_sun: i64,
    pub fallback_sent_sun: i64,
    pub trx_swept_sun: i64,
    pub trx_usd_price: f64,
    pub price_is_fallback: bool,
    pub total_usd_cost: MicroUsdt,
}

pub struct PayoutRequest<'a> {
    pub deal_id: Uuid,
    pub recipient_address: &'a str,
    pub net_amount: MicroUsdt,
    pub commission: MicroUsdt,
    pub commission_wallet: &'a str,
    pub arbiter_address: &'a str,
    pub recipient_signing_key: &'a str,
    pub terminal_event: DealEvent,
    pub payout_kind: TransactionKind,
}

/// Runs the full pipeline for one deal. The recipient payout succeeding is
/// the authoritative "done" event: a failed commission transfer or TRX sweep
/// is logged and raises an admin alert but does not roll back the payout or
/// block the deal's terminal transition (spec's `PartialPipelineFailure`).
pub async fn run<R: EnergyRentalProvider>(
    conn: &mut Connection,
    chain: &ChainClient,
    price_feed: &PriceFeed,
    rental: Option<&R>,
    req: PayoutRequest<'_>,
) -> Result<Deal, PayoutError> {
    let deal = deals::get_deal(conn, req.deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {}", req.deal_id)))?;
    let multisig_address = deal
        .multisig_address
        .clone()
        .ok_or_else(|| StoreError::InvalidInput("deal has no multisig address".into()))?;

    let resource_method = resource::provision(rental, chain, req.arbiter_address, &multisig_address).await?;
    info!(deal_id = %req.deal_id, method:? = resource_method; "resource provisioned");

    let payout_result = chain
        .send_usdt(&multisig_address, req.recipient_address, req.net_amount.0, &[req.arbiter_address, req.recipient_signing_key])
        .await;

    let payout_broadcast = match payout_result {
        Ok(r) if r.accepted => r,
        Ok(r) => {
            let msg = r.message.unwrap_or_else(|| "rejected".into());
            deals::clear_pending_key_validation(conn, req.deal_id)?;
            alerts::raise(conn, "payout_broadcast_failed", &format!("deal {}: payout rejected: {msg}", req.deal_id))?;
            return Err(PayoutError::BroadcastFailed(msg));
        },
        Err(e) => {
            deals::clear_pending_key_validation(conn, req.deal_id)?;
            alerts::raise(conn, "payout_broadcast_failed", &format!("deal {}: payout broadcast error: {e}", req.deal_id))?;
            return Err(PayoutError::BroadcastFailed(e.to_string()));
        },
    };

    transactions::insert_transaction(
        conn,
        req.deal_id,
        req.payout_kind,
        Some(&payout_broadcast.tx_hash),
        req.net_amount,
        false,
    )?;

    let commission_result = chain
        .send_usdt(&multisig_address, req.commission_wallet, req.commission.0, &[req.arbiter_address, req.recipient_signing_key])
        .await;

    match commission_result {
        Ok(r) if r.accepted => {
            transactions::insert_transaction(conn, req.deal_id, TransactionKind::Commission, Some(&r.tx_hash), req.commission, false)?;
        },
        other => {
            let msg = match other {
                Ok(r) => r.message.unwrap_or_else(|| "rejected".into()),
                Err(e) => e.to_string(),
            };
            warn!(deal_id = %req.deal_id, error = %msg; "commission transfer failed, payout still authoritative");
            alerts::raise(conn, "payout_partial_failure", &format!("deal {}: commission transfer failed: {msg}", req.deal_id))?;
        },
    }

    tokio::time::sleep(SWEEP_WAIT).await;
    let trx_swept_sun = sweep_excess_trx(conn, chain, &multisig_address, req.arbiter_address, req.deal_id).await;

    let quote = price_feed.get_trx_usd().await;
    let costs = build_cost_record(&resource_method, trx_swept_sun, quote.trx_usd, quote.is_fallback);
    info!(deal_id = %req.deal_id, costs:? = costs; "payout pipeline cost accounting");

    let costs_json = serde_json::to_string(&costs).unwrap_or_else(|_| "{}".to_string());
    deals::set_operational_costs(conn, req.deal_id, &costs_json)?;

    deals::clear_pending_key_validation(conn, req.deal_id)?;
    let current = deals::get_deal(conn, req.deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {}", req.deal_id)))?;
    deals::apply_transition(conn, req.deal_id, current.version, req.terminal_event, "payout_pipeline", "payout cleared")
        .map_err(Into::into)
}

async fn sweep_excess_trx(conn: &Connection, chain: &ChainClient, multisig_address: &str, arbiter_address: &str, deal_id: Uuid) -> i64 {
    let balance = match chain.get_balance(multisig_address).await {
        Ok(b) => b,
        Err(e) => {
            error!(deal_id = %deal_id, error:% = e; "could not read multisig balance for sweep");
            return 0;
        },
    };

    if balance.trx_sun <= TRX_RESERVE_SUN {
        return 0;
    }

    let excess = balance.trx_sun - TRX_RESERVE_SUN;
    match chain.send_trx(multisig_address, arbiter_address, excess).await {
        Ok(r) if r.accepted => {
            let _ = transactions::insert_transaction(conn, deal_id, TransactionKind::TrxSweep, Some(&r.tx_hash), MicroUsdt(excess), false);
            excess
        },
        _ => 0,
    }
}

fn build_cost_record(method: &ResourceMethod, trx_swept_sun: i64, trx_usd: f64, price_is_fallback: bool) -> OperationalCosts {
    let (resource_method, rental_cost_sun, fallback_sent_sun) = match method {
        ResourceMethod::EnergyRental { cost_trx_sun } => ("feesaver", *cost_trx_sun, 0),
        ResourceMethod::TrxFallback { sent_sun } => ("trx", 0, *sent_sun),
    };

    let net_trx_sun = rental_cost_sun + fallback_sent_sun - trx_swept_sun;
    let total_usd_cost = resource::micro_usdt_at_price(net_trx_sun.max(0), trx_usd);

    OperationalCosts {
        resource_method,
        rental_cost_sun,
        fallback_sent_sun,
        trx_swept_sun,
        trx_usd_price: trx_usd,
        price_is_fallback,
        total_usd_cost,
    }
}
