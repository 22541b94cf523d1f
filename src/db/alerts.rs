use chrono::NaiveDateTime;
use rusqlite::{Connection, named_params};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::error::StoreResult;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminAlert {
    pub id: i64,
    pub category: String,
    pub message: String,
    pub acknowledged: bool,
    pub created_at: NaiveDateTime,
}

/// Raised by the circuit breaker on state change and by the payout pipeline
/// on partial failure (commission transfer failing after a successful payout).
pub fn raise(conn: &Connection, category: &str, message: &str) -> StoreResult<i64> {
    conn.execute(
        r#"
        INSERT INTO admin_alerts (category, message, acknowledged, created_at)
        VALUES (:category, :message, 0, datetime('now'))
        "#,
        named_params! { ":category": category, ":message": message },
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_unacknowledged(conn: &Connection) -> StoreResult<Vec<AdminAlert>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT id, category, message, acknowledged, REPLACE(created_at, ' ', 'T')
        FROM admin_alerts WHERE acknowledged = 0 ORDER BY created_at DESC
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        let created_at: String = row.get(4)?;
        Ok(AdminAlert {
            id: row.get(0)?,
            category: row.get(1)?,
            message: row.get(2)?,
            acknowledged: row.get(3)?,
            created_at: super::parse_naive(&created_at),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn acknowledge(conn: &Connection, id: i64) -> StoreResult<()> {
    conn.execute("UPDATE admin_alerts SET acknowledged = 1 WHERE id = :id", named_params! { ":id": id })?;
    Ok(())
}
