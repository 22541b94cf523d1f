use chrono::Utc;
use rusqlite::{Connection, named_params};
use uuid::Uuid;

use crate::db::error::StoreResult;
use crate::models::{MicroUsdt, TransactionKind, TransactionRecord};

pub fn insert_transaction(
    conn: &Connection,
    deal_id: Uuid,
    kind: TransactionKind,
    tx_hash: Option<&str>,
    amount: MicroUsdt,
    confirmed: bool,
) -> StoreResult<i64> {
    conn.execute(
        r#"
        INSERT INTO transactions (deal_id, kind, tx_hash, amount_micro, confirmed, created_at)
        VALUES (:deal_id, :kind, :tx_hash, :amount_micro, :confirmed, :now)
        "#,
        named_params! {
            ":deal_id": deal_id.to_string(),
            ":kind": kind.to_string(),
            ":tx_hash": tx_hash,
            ":amount_micro": amount.0,
            ":confirmed": confirmed,
            ":now": Utc::now().naive_utc().to_string(),
        },
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn mark_confirmed(conn: &Connection, id: i64) -> StoreResult<()> {
    conn.execute("UPDATE transactions SET confirmed = 1 WHERE id = :id", named_params! { ":id": id })?;
    Ok(())
}

pub fn list_for_deal(conn: &Connection, deal_id: Uuid) -> StoreResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT id, deal_id, kind, tx_hash, amount_micro, confirmed, created_at
        FROM transactions WHERE deal_id = :deal_id ORDER BY created_at ASC
        "#,
    )?;
    let rows = stmt.query_map(named_params! { ":deal_id": deal_id.to_string() }, row_to_tx)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn deposit_already_credited(conn: &Connection, deal_id: Uuid, tx_hash: &str) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE deal_id = :deal_id AND tx_hash = :tx_hash",
        named_params! { ":deal_id": deal_id.to_string(), ":tx_hash": tx_hash },
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_tx(row: &rusqlite::Row) -> rusqlite::Result<TransactionRecord> {
    let deal_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let created_at: String = row.get(6)?;
    Ok(TransactionRecord {
        id: row.get(0)?,
        deal_id: Uuid::parse_str(&deal_id).unwrap_or_default(),
        kind: kind.parse().unwrap_or(TransactionKind::Deposit),
        tx_hash: row.get(3)?,
        amount: MicroUsdt(row.get(4)?),
        confirmed: row.get(5)?,
        created_at: super::parse_naive(&created_at),
    })
}
