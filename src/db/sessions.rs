use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, named_params};
use uuid::Uuid;

use crate::db::error::StoreResult;
use crate::models::Session;

/// Issues a scoped, TTL-bound session for a single privileged operation
/// (e.g. `key_validation` before a payout).
pub fn create_session(conn: &Connection, deal_id: Uuid, user_id: &str, scope: &str, ttl: chrono::Duration) -> StoreResult<Session> {
    let id = Uuid::new_v4();
    let now = Utc::now().naive_utc();
    let expires_at = now + ttl;

    conn.execute(
        r#"
        INSERT INTO sessions (id, deal_id, user_id, scope, attempts, expires_at, created_at)
        VALUES (:id, :deal_id, :user_id, :scope, 0, :expires_at, :now)
        "#,
        named_params! {
            ":id": id.to_string(),
            ":deal_id": deal_id.to_string(),
            ":user_id": user_id,
            ":scope": scope,
            ":expires_at": expires_at.to_string(),
            ":now": now.to_string(),
        },
    )?;

    Ok(Session { id, deal_id, user_id: user_id.to_string(), scope: scope.to_string(), attempts: 0, expires_at, created_at: now })
}

/// Bumps the attempt counter and returns the new count. Callers compare the
/// result against `key_validation::MAX_KEY_VALIDATION_ATTEMPTS` and invalidate
/// the session once it's reached.
pub fn bump_attempt(conn: &Connection, id: Uuid) -> StoreResult<u32> {
    conn.execute("UPDATE sessions SET attempts = attempts + 1 WHERE id = :id", named_params! { ":id": id.to_string() })?;
    let attempts: i64 = conn.query_row("SELECT attempts FROM sessions WHERE id = :id", named_params! { ":id": id.to_string() }, |r| r.get(0))?;
    Ok(attempts as u32)
}

pub fn invalidate(conn: &Connection, id: Uuid) -> StoreResult<()> {
    conn.execute("DELETE FROM sessions WHERE id = :id", named_params! { ":id": id.to_string() })?;
    Ok(())
}

pub fn find_valid(conn: &Connection, id: Uuid, scope: &str) -> StoreResult<Option<Session>> {
    conn.query_row(
        r#"
        SELECT id, deal_id, user_id, scope, attempts, expires_at, created_at
        FROM sessions WHERE id = :id AND scope = :scope AND expires_at > :now
        "#,
        named_params! {
            ":id": id.to_string(),
            ":scope": scope,
            ":now": Utc::now().naive_utc().to_string(),
        },
        row_to_session,
    )
    .optional()
    .map_err(Into::into)
}

/// Deletes expired sessions. Run eagerly by the deadline monitor's periodic
/// tick; also happens lazily whenever `find_valid` excludes an expired row.
pub fn sweep_expired(conn: &Connection) -> StoreResult<usize> {
    let count = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= :now",
        named_params! { ":now": Utc::now().naive_utc().to_string() },
    )?;
    Ok(count)
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let deal_id: String = row.get(1)?;
    let attempts: i64 = row.get(4)?;
    let expires_at: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(Session {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        deal_id: Uuid::parse_str(&deal_id).unwrap_or_default(),
        user_id: row.get(2)?,
        scope: row.get(3)?,
        attempts: attempts as u32,
        expires_at: parse(&expires_at),
        created_at: parse(&created_at),
    })
}

fn parse(s: &str) -> NaiveDateTime {
    super::parse_naive(s)
}
