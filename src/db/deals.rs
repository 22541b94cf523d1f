use chrono::{NaiveDateTime, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, named_params};
use uuid::Uuid;

use crate::db::error::{StoreError, StoreResult};
use crate::db::{users, wallets};
use crate::models::{CommissionPayer, Deal, DealStatus, MicroUsdt, PendingKeyValidation};
use crate::state_machine::{DealEvent, transition};

/// Statuses that free a user up to appear in a new deal again. Everything
/// else (including `Disputed`, which per spec stays open until payout
/// clears) counts as active.
const ACTIVE_STATUS_FILTER: &str = "('released','refunded','resolved_buyer','resolved_seller','cancelled','failed')";

#[allow(clippy::too_many_arguments)]
pub fn create_deal(
    conn: &Connection,
    buyer_id: &str,
    seller_id: &str,
    arbiter_id: &str,
    amount: MicroUsdt,
    buyer_payout_address: &str,
    seller_payout_address: &str,
    commission_payer: CommissionPayer,
    deadline: NaiveDateTime,
) -> StoreResult<Deal> {
    if users::get_or_default(conn, buyer_id)?.blacklisted {
        return Err(StoreError::InvalidInput(format!("user {buyer_id} is blacklisted and cannot create or join a deal")));
    }
    if users::get_or_default(conn, seller_id)?.blacklisted {
        return Err(StoreError::InvalidInput(format!("user {seller_id} is blacklisted and cannot create or join a deal")));
    }
    if has_active_deal(conn, buyer_id)? {
        return Err(StoreError::InvalidInput(format!("user {buyer_id} already has an active deal")));
    }
    if has_active_deal(conn, seller_id)? {
        return Err(StoreError::InvalidInput(format!("user {seller_id} already has an active deal")));
    }

    let id = Uuid::new_v4();
    let now = Utc::now().naive_utc();

    conn.execute(
        r#"
        INSERT INTO deals (
            id, buyer_id, seller_id, arbiter_id, amount_micro,
            buyer_payout_address, seller_payout_address, commission_payer,
            status, multisig_address, deadline, grace_expires_at,
            deposit_notification_sent, deadline_notification_sent, work_submitted, pending_key_validation,
            operational_costs, created_at, updated_at, version
        ) VALUES (
            :id, :buyer_id, :seller_id, :arbiter_id, :amount_micro,
            :buyer_payout_address, :seller_payout_address, :commission_payer,
            :status, NULL, :deadline, NULL, 0, 0, 0, NULL, NULL, :now, :now, 0
        )
        "#,
        named_params! {
            ":id": id.to_string(),
            ":buyer_id": buyer_id,
            ":seller_id": seller_id,
            ":arbiter_id": arbiter_id,
            ":amount_micro": amount.0,
            ":buyer_payout_address": buyer_payout_address,
            ":seller_payout_address": seller_payout_address,
            ":commission_payer": commission_payer.to_string(),
            ":status": DealStatus::Created.to_string(),
            ":deadline": deadline.to_string(),
            ":now": now.to_string(),
        },
    )?;

    get_deal(conn, id)?.ok_or_else(|| StoreError::Unexpected("deal vanished after insert".into()))
}

/// Backs both Invariant "at most one active deal per user" and the blacklist
/// check's counterpart: a user already in a non-terminal deal, on either
/// side, can't be party to a second one.
fn has_active_deal(conn: &Connection, user_id: &str) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM deals WHERE (buyer_id = :user_id OR seller_id = :user_id) AND status NOT IN {ACTIVE_STATUS_FILTER}"
        ),
        named_params! { ":user_id": user_id },
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

const DEAL_COLUMNS: &str = r#"
    id, buyer_id, seller_id, arbiter_id, amount_micro, status,
    multisig_address, deadline, grace_expires_at,
    deposit_notification_sent, deadline_notification_sent, work_submitted, pending_key_validation,
    buyer_payout_address, seller_payout_address, commission_payer, operational_costs,
    created_at, updated_at, version
"#;

pub fn get_deal(conn: &Connection, id: Uuid) -> StoreResult<Option<Deal>> {
    conn.query_row(
        &format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = :id"),
        named_params! { ":id": id.to_string() },
        row_to_deal,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn list_deals_by_status(conn: &Connection, status: DealStatus) -> StoreResult<Vec<Deal>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {DEAL_COLUMNS} FROM deals WHERE status = :status ORDER BY created_at ASC"))?;
    let rows = stmt.query_map(named_params! { ":status": status.to_string() }, row_to_deal)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Unfiltered page of deals, newest first. Backs the admin API's list view
/// when no `status` query parameter is given.
pub fn list_recent(conn: &Connection, limit: i64) -> StoreResult<Vec<Deal>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {DEAL_COLUMNS} FROM deals ORDER BY created_at DESC LIMIT :limit"))?;
    let rows = stmt.query_map(named_params! { ":limit": limit }, row_to_deal)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Deals past their deadline that haven't had an expiration notice sent, or
/// that are in grace and not yet tagged for key validation. Feeds the
/// deadline sweep; the monitor itself decides which branch applies.
pub fn list_funded_past_deadline(conn: &Connection, now: NaiveDateTime) -> StoreResult<Vec<Deal>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {DEAL_COLUMNS} FROM deals WHERE status = :status AND deadline <= :now ORDER BY deadline ASC"
    ))?;
    let rows = stmt.query_map(
        named_params! { ":status": DealStatus::Funded.to_string(), ":now": now.to_string() },
        row_to_deal,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Sets `deposit_notification_sent` from false to true. Returns `false` (no
/// row changed) if it was already set, so callers can treat that as "someone
/// else already notified" rather than notifying twice.
pub fn mark_deposit_notified(conn: &Connection, id: Uuid) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE deals SET deposit_notification_sent = 1, updated_at = :now WHERE id = :id AND deposit_notification_sent = 0",
        named_params! { ":now": Utc::now().naive_utc().to_string(), ":id": id.to_string() },
    )?;
    Ok(changed > 0)
}

/// Sets `deadline_notification_sent` from false to true, same semantics as
/// [`mark_deposit_notified`].
pub fn mark_deadline_notified(conn: &Connection, id: Uuid) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE deals SET deadline_notification_sent = 1, updated_at = :now WHERE id = :id AND deadline_notification_sent = 0",
        named_params! { ":now": Utc::now().naive_utc().to_string(), ":id": id.to_string() },
    )?;
    Ok(changed > 0)
}

/// Tags a deal as awaiting a specific key validation. Only succeeds while the
/// tag is currently unset, so it can only ever be set once per grace episode.
pub fn set_pending_key_validation(conn: &Connection, id: Uuid, tag: PendingKeyValidation) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE deals SET pending_key_validation = :tag, updated_at = :now WHERE id = :id AND pending_key_validation IS NULL",
        named_params! { ":tag": tag.to_string(), ":now": Utc::now().naive_utc().to_string(), ":id": id.to_string() },
    )?;
    Ok(changed > 0)
}

/// Clears the pending key validation tag on successful validation.
pub fn clear_pending_key_validation(conn: &Connection, id: Uuid) -> StoreResult<()> {
    conn.execute(
        "UPDATE deals SET pending_key_validation = NULL, updated_at = :now WHERE id = :id",
        named_params! { ":now": Utc::now().naive_utc().to_string(), ":id": id.to_string() },
    )?;
    Ok(())
}

/// Marks the seller's side of a `Funded` deal as done, switching which party
/// the Deadline Monitor's grace-expiry branch favors.
pub fn mark_work_submitted(conn: &Connection, id: Uuid) -> StoreResult<()> {
    conn.execute(
        "UPDATE deals SET work_submitted = 1, updated_at = :now WHERE id = :id",
        named_params! { ":now": Utc::now().naive_utc().to_string(), ":id": id.to_string() },
    )?;
    Ok(())
}

pub fn set_multisig_address(conn: &Connection, id: Uuid, address: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE deals SET multisig_address = :address, updated_at = :now, version = version + 1 WHERE id = :id",
        named_params! {
            ":address": address,
            ":now": Utc::now().naive_utc().to_string(),
            ":id": id.to_string(),
        },
    )?;
    Ok(())
}

/// Provisions a deal's multisig wallet and drives `Created -> AwaitingDeposit`.
/// The Deal Store owns both the Deal aggregate and its Multisig Wallet child,
/// so this reaches into `db::wallets` directly rather than through a separate
/// orchestration layer.
#[allow(clippy::too_many_arguments)]
pub fn provision_wallet(
    conn: &mut Connection,
    deal_id: Uuid,
    expected_version: i64,
    wallet_address: &str,
    buyer_key_addr: &str,
    seller_key_addr: &str,
    arbiter_key_addr: &str,
) -> StoreResult<Deal> {
    wallets::insert_wallet(conn, deal_id, wallet_address, buyer_key_addr, seller_key_addr, arbiter_key_addr)?;
    apply_transition(conn, deal_id, expected_version, DealEvent::ProvisionWallet, "system", "multisig wallet provisioned")?;
    set_multisig_address(conn, deal_id, wallet_address)?;
    get_deal(conn, deal_id)?.ok_or_else(|| StoreError::NotFound(format!("deal {deal_id}")))
}

pub fn set_grace_expires_at(conn: &Connection, id: Uuid, grace_expires_at: NaiveDateTime) -> StoreResult<()> {
    conn.execute(
        "UPDATE deals SET grace_expires_at = :grace, updated_at = :now, version = version + 1 WHERE id = :id",
        named_params! {
            ":grace": grace_expires_at.to_string(),
            ":now": Utc::now().naive_utc().to_string(),
            ":id": id.to_string(),
        },
    )?;
    Ok(())
}

/// Applies a state machine event to a deal inside a single transaction: checks
/// the current status against `expected_version`, writes the new status,
/// bumps `version`, and appends an audit row. Returns `StoreError::Conflict`
/// if another writer changed the deal first.
pub fn apply_transition(
    conn: &mut Connection,
    id: Uuid,
    expected_version: i64,
    event: DealEvent,
    actor: &str,
    reason: &str,
) -> StoreResult<Deal> {
    let tx = conn.transaction()?;

    let deal = {
        let row = tx
            .query_row(&format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = :id"), named_params! { ":id": id.to_string() }, row_to_deal)
            .optional()?;
        row.ok_or_else(|| StoreError::NotFound(format!("deal {id}")))?
    };

    if deal.version != expected_version {
        return Err(StoreError::Conflict(id));
    }

    let next = transition(deal.status, event).map_err(|e| StoreError::InvalidTransition(e.to_string()))?;
    let now = Utc::now().naive_utc();

    let changed = tx.execute(
        r#"
        UPDATE deals SET status = :status, updated_at = :now, version = version + 1
        WHERE id = :id AND version = :expected_version
        "#,
        named_params! {
            ":status": next.to_string(),
            ":now": now.to_string(),
            ":id": id.to_string(),
            ":expected_version": expected_version,
        },
    )?;

    if changed == 0 {
        return Err(StoreError::Conflict(id));
    }

    tx.execute(
        r#"
        INSERT INTO audit_log (deal_id, from_status, to_status, actor, reason, created_at)
        VALUES (:deal_id, :from_status, :to_status, :actor, :reason, :now)
        "#,
        named_params! {
            ":deal_id": id.to_string(),
            ":from_status": deal.status.to_string(),
            ":to_status": next.to_string(),
            ":actor": actor,
            ":reason": reason,
            ":now": now.to_string(),
        },
    )?;

    debug!(deal_id = %id, from = %deal.status, to = %next; "deal transition applied");

    tx.commit()?;

    get_deal(conn, id)?.ok_or_else(|| StoreError::Unexpected("deal vanished after transition".into()))
}

fn row_to_deal(row: &rusqlite::Row) -> rusqlite::Result<Deal> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let deadline: String = row.get(7)?;
    let grace: Option<String> = row.get(8)?;
    let pending_key_validation: Option<String> = row.get(12)?;
    let commission_payer: String = row.get(15)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;

    Ok(Deal {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        buyer_id: row.get(1)?,
        seller_id: row.get(2)?,
        arbiter_id: row.get(3)?,
        amount: MicroUsdt(row.get(4)?),
        status: status.parse().unwrap_or(DealStatus::Failed),
        multisig_address: row.get(6)?,
        deadline: super::parse_naive(&deadline),
        grace_expires_at: grace.as_deref().map(super::parse_naive),
        deposit_notification_sent: row.get::<_, i64>(9)? != 0,
        deadline_notification_sent: row.get::<_, i64>(10)? != 0,
        work_submitted: row.get::<_, i64>(11)? != 0,
        pending_key_validation: pending_key_validation.as_deref().and_then(|s| s.parse().ok()),
        buyer_payout_address: row.get(13)?,
        seller_payout_address: row.get(14)?,
        commission_payer: commission_payer.parse().unwrap_or(CommissionPayer::Buyer),
        operational_costs: row.get(16)?,
        created_at: super::parse_naive(&created_at),
        updated_at: super::parse_naive(&updated_at),
        version: row.get(19)?,
    })
}

/// Persists the cost breakdown the Payout Pipeline computed for a deal
/// (energy rental, TRX sweep, commission) as opaque JSON for audit/reporting.
pub fn set_operational_costs(conn: &Connection, id: Uuid, costs_json: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE deals SET operational_costs = :costs, updated_at = :now WHERE id = :id",
        named_params! {
            ":costs": costs_json,
            ":now": Utc::now().naive_utc().to_string(),
            ":id": id.to_string(),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::Duration;
    use tempfile::tempdir;

    #[test]
    fn create_and_transition_deal() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals.db")).unwrap();
        let mut conn = pool.get().unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        let deal = create_deal(
            &conn,
            "buyer1",
            "seller1",
            "arbiter1",
            MicroUsdt::from_usdt(100),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap();
        assert_eq!(deal.status, DealStatus::Created);
        assert_eq!(deal.version, 0);

        let deal = apply_transition(&mut conn, deal.id, 0, DealEvent::ProvisionWallet, "system", "wallet provisioned")
            .unwrap();
        assert_eq!(deal.status, DealStatus::AwaitingDeposit);
        assert_eq!(deal.version, 1);
    }

    #[test]
    fn provision_wallet_stamps_address_and_advances_status() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals_provision.db")).unwrap();
        let mut conn = pool.get().unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        let deal = create_deal(
            &conn,
            "buyer1",
            "seller1",
            "arbiter1",
            MicroUsdt::from_usdt(100),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap();

        let deal = provision_wallet(&mut conn, deal.id, deal.version, "TMultisigAddr", "TBuyerKey", "TSellerKey", "TArbiterKey").unwrap();

        assert_eq!(deal.status, DealStatus::AwaitingDeposit);
        assert_eq!(deal.multisig_address.as_deref(), Some("TMultisigAddr"));

        let wallet = wallets::get_wallet_for_deal(&conn, deal.id).unwrap().unwrap();
        assert_eq!(wallet.buyer_key_addr, "TBuyerKey");
        assert_eq!(wallet.arbiter_key_addr, "TArbiterKey");
    }

    #[test]
    fn stale_version_conflicts() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals_conflict.db")).unwrap();
        let mut conn = pool.get().unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        let deal = create_deal(
            &conn,
            "b",
            "s",
            "a",
            MicroUsdt::from_usdt(50),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap();

        apply_transition(&mut conn, deal.id, 0, DealEvent::ProvisionWallet, "system", "ok").unwrap();

        let err = apply_transition(&mut conn, deal.id, 0, DealEvent::ProvisionWallet, "system", "stale").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn notification_latches_are_monotonic() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals_latch.db")).unwrap();
        let conn = pool.get().unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        let deal = create_deal(
            &conn,
            "b",
            "s",
            "a",
            MicroUsdt::from_usdt(50),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap();
        assert!(!deal.deposit_notification_sent);

        assert!(mark_deposit_notified(&conn, deal.id).unwrap());
        assert!(!mark_deposit_notified(&conn, deal.id).unwrap());

        let deal = get_deal(&conn, deal.id).unwrap().unwrap();
        assert!(deal.deposit_notification_sent);
        assert!(!deal.deadline_notification_sent);
    }

    #[test]
    fn pending_key_validation_is_set_once_until_cleared() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals_pkv.db")).unwrap();
        let conn = pool.get().unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        let deal = create_deal(
            &conn,
            "b",
            "s",
            "a",
            MicroUsdt::from_usdt(50),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap();

        assert!(set_pending_key_validation(&conn, deal.id, PendingKeyValidation::BuyerRefund).unwrap());
        assert!(!set_pending_key_validation(&conn, deal.id, PendingKeyValidation::SellerRelease).unwrap());

        let deal = get_deal(&conn, deal.id).unwrap().unwrap();
        assert_eq!(deal.pending_key_validation, Some(PendingKeyValidation::BuyerRefund));

        clear_pending_key_validation(&conn, deal.id).unwrap();
        assert!(set_pending_key_validation(&conn, deal.id, PendingKeyValidation::SellerRelease).unwrap());
    }

    #[test]
    fn blacklisted_user_cannot_create_a_deal() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals_blacklist.db")).unwrap();
        let conn = pool.get().unwrap();

        users::record_outcome(&conn, "seller1", false).unwrap();
        users::record_outcome(&conn, "seller1", false).unwrap();
        users::record_outcome(&conn, "seller1", false).unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        let err = create_deal(
            &conn,
            "buyer1",
            "seller1",
            "arbiter1",
            MicroUsdt::from_usdt(50),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn a_user_cannot_join_a_second_active_deal() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("deals_active.db")).unwrap();
        let conn = pool.get().unwrap();

        let deadline = Utc::now().naive_utc() + Duration::hours(24);
        create_deal(
            &conn,
            "buyer1",
            "seller1",
            "arbiter1",
            MicroUsdt::from_usdt(50),
            "TBuyerPayout",
            "TSellerPayout",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap();

        // buyer1 is still mid-deal (status Created); seller1 tries to buy from someone else.
        let err = create_deal(
            &conn,
            "buyer2",
            "seller1",
            "arbiter1",
            MicroUsdt::from_usdt(50),
            "TBuyerPayout2",
            "TSellerPayout2",
            CommissionPayer::Buyer,
            deadline,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
}
