use chrono::Utc;
use rusqlite::{Connection, named_params};
use uuid::Uuid;

use crate::db::error::StoreResult;
use crate::models::{AuditEntry, DealStatus};

/// Appends an informational audit row that doesn't change the deal's status
/// (e.g. the arbiter's ruling, recorded while the deal stays `Disputed`).
pub fn record_note(conn: &Connection, deal_id: Uuid, status: DealStatus, actor: &str, reason: &str) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO audit_log (deal_id, from_status, to_status, actor, reason, created_at)
        VALUES (:deal_id, :status, :status, :actor, :reason, :now)
        "#,
        named_params! {
            ":deal_id": deal_id.to_string(),
            ":status": status.to_string(),
            ":actor": actor,
            ":reason": reason,
            ":now": Utc::now().naive_utc().to_string(),
        },
    )?;
    Ok(())
}

pub fn list_for_deal(conn: &Connection, deal_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT id, deal_id, from_status, to_status, actor, reason, created_at
        FROM audit_log WHERE deal_id = :deal_id ORDER BY id ASC
        "#,
    )?;
    let rows = stmt.query_map(named_params! { ":deal_id": deal_id.to_string() }, |row| {
        let deal_id: String = row.get(1)?;
        let from_status: Option<String> = row.get(2)?;
        let to_status: String = row.get(3)?;
        let created_at: String = row.get(6)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            deal_id: Uuid::parse_str(&deal_id).unwrap_or_default(),
            from_status: from_status.and_then(|s| s.parse().ok()),
            to_status: to_status.parse().unwrap_or(crate::models::DealStatus::Failed),
            actor: row.get(4)?,
            reason: row.get(5)?,
            created_at: super::parse_naive(&created_at),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}
