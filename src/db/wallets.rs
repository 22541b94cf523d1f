use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, named_params};
use uuid::Uuid;

use crate::db::error::StoreResult;
use crate::models::MultisigWallet;

pub fn insert_wallet(
    conn: &Connection,
    deal_id: Uuid,
    address: &str,
    buyer_key_addr: &str,
    seller_key_addr: &str,
    arbiter_key_addr: &str,
) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO multisig_wallets (deal_id, address, buyer_key_addr, seller_key_addr, arbiter_key_addr, created_at)
        VALUES (:deal_id, :address, :buyer_key_addr, :seller_key_addr, :arbiter_key_addr, :now)
        "#,
        named_params! {
            ":deal_id": deal_id.to_string(),
            ":address": address,
            ":buyer_key_addr": buyer_key_addr,
            ":seller_key_addr": seller_key_addr,
            ":arbiter_key_addr": arbiter_key_addr,
            ":now": Utc::now().naive_utc().to_string(),
        },
    )?;
    Ok(())
}

pub fn get_wallet_for_deal(conn: &Connection, deal_id: Uuid) -> StoreResult<Option<MultisigWallet>> {
    conn.query_row(
        r#"
        SELECT deal_id, address, buyer_key_addr, seller_key_addr, arbiter_key_addr, created_at
        FROM multisig_wallets WHERE deal_id = :deal_id
        "#,
        named_params! { ":deal_id": deal_id.to_string() },
        |row| {
            let deal_id: String = row.get(0)?;
            let created_at: String = row.get(5)?;
            Ok(MultisigWallet {
                deal_id: Uuid::parse_str(&deal_id).unwrap_or_default(),
                address: row.get(1)?,
                buyer_key_addr: row.get(2)?,
                seller_key_addr: row.get(3)?,
                arbiter_key_addr: row.get(4)?,
                created_at: super::parse_naive(&created_at),
            })
        },
    )
    .optional()
    .map_err(Into::into)
}
