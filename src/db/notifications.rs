use chrono::NaiveDateTime;
use log::debug;
use rusqlite::{Connection, named_params};
use uuid::Uuid;

use crate::db::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NoticeStatus {
    Pending,
    Sent,
    Failed,
    PermanentFailure,
}

impl std::fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NoticeStatus::Pending => "pending",
            NoticeStatus::Sent => "sent",
            NoticeStatus::Failed => "failed",
            NoticeStatus::PermanentFailure => "permanent_failure",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for NoticeStatus {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NoticeStatus::Pending),
            "sent" => Ok(NoticeStatus::Sent),
            "failed" => Ok(NoticeStatus::Failed),
            "permanent_failure" => Ok(NoticeStatus::PermanentFailure),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedNotice {
    pub id: i64,
    pub deal_id: Option<Uuid>,
    pub notice_type: String,
    pub payload: String,
    pub target_url: String,
    pub status: NoticeStatus,
    pub attempt_count: i32,
    pub next_retry_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub last_error: Option<String>,
}

/// Enqueues a notice for out-of-band delivery. Called from within the same
/// transaction that records the triggering deal event.
pub fn enqueue(
    conn: &Connection,
    deal_id: Option<Uuid>,
    notice_type: &str,
    payload: &str,
    target_url: &str,
) -> StoreResult<i64> {
    debug!(notice_type = notice_type, target_url = target_url; "enqueueing notification");

    conn.execute(
        r#"
        INSERT INTO notification_queue (
            deal_id, notice_type, payload, target_url, status, attempt_count, next_retry_at, created_at
        ) VALUES (
            :deal_id, :notice_type, :payload, :target_url, :status, 0, datetime('now'), datetime('now')
        )
        "#,
        named_params! {
            ":deal_id": deal_id.map(|id| id.to_string()),
            ":notice_type": notice_type,
            ":payload": payload,
            ":target_url": target_url,
            ":status": NoticeStatus::Pending.to_string(),
        },
    )?;

    Ok(conn.last_insert_rowid())
}

/// Fetches notices ready to be sent: pending, or failed with an elapsed backoff.
pub fn fetch_due(conn: &Connection, limit: i64) -> StoreResult<Vec<QueuedNotice>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            id, deal_id, notice_type, payload, target_url, status, attempt_count,
            REPLACE(next_retry_at, ' ', 'T') as next_retry_at,
            REPLACE(created_at, ' ', 'T') as created_at,
            last_error
        FROM notification_queue
        WHERE status IN ('pending', 'failed') AND next_retry_at <= datetime('now')
        ORDER BY next_retry_at ASC
        LIMIT :limit
        "#,
    )?;

    let rows = stmt.query_map(named_params! { ":limit": limit }, |row| {
        let deal_id: Option<String> = row.get(1)?;
        let status_str: String = row.get(5)?;
        let next_retry_at: String = row.get(7)?;
        let created_at: String = row.get(8)?;
        Ok(QueuedNotice {
            id: row.get(0)?,
            deal_id: deal_id.and_then(|s| Uuid::parse_str(&s).ok()),
            notice_type: row.get(2)?,
            payload: row.get(3)?,
            target_url: row.get(4)?,
            status: status_str.parse().unwrap_or(NoticeStatus::Failed),
            attempt_count: row.get(6)?,
            next_retry_at: super::parse_naive(&next_retry_at),
            created_at: super::parse_naive(&created_at),
            last_error: row.get(9)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn update_status(
    conn: &Connection,
    id: i64,
    status: NoticeStatus,
    attempt_count: i32,
    next_retry_at: NaiveDateTime,
    last_error: Option<&str>,
) -> StoreResult<()> {
    conn.execute(
        r#"
        UPDATE notification_queue
        SET status = :status, attempt_count = :attempt_count, next_retry_at = :next_retry_at, last_error = :last_error
        WHERE id = :id
        "#,
        named_params! {
            ":id": id,
            ":status": status.to_string(),
            ":attempt_count": attempt_count,
            ":next_retry_at": next_retry_at.to_string(),
            ":last_error": last_error,
        },
    )?;
    Ok(())
}

pub fn delete_older_than(conn: &Connection, timestamp: NaiveDateTime) -> StoreResult<usize> {
    let count = conn.execute(
        "DELETE FROM notification_queue WHERE created_at < :timestamp",
        named_params! { ":timestamp": timestamp.to_string() },
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    #[test]
    fn notice_lifecycle_respects_backoff() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("notices.db")).unwrap();
        let conn = pool.get().unwrap();

        let id = enqueue(&conn, None, "deal.funded", r#"{"ok":true}"#, "https://example.test/hook").unwrap();

        let due = fetch_due(&conn, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);

        let future = Utc::now().naive_utc() + Duration::hours(1);
        update_status(&conn, id, NoticeStatus::Failed, 1, future, Some("timeout")).unwrap();
        assert!(fetch_due(&conn, 10).unwrap().is_empty());

        let past = Utc::now().naive_utc() - Duration::minutes(1);
        update_status(&conn, id, NoticeStatus::Failed, 1, past, Some("timeout")).unwrap();
        assert_eq!(fetch_due(&conn, 10).unwrap().len(), 1);

        update_status(&conn, id, NoticeStatus::Sent, 2, Utc::now().naive_utc(), None).unwrap();
        assert!(fetch_due(&conn, 10).unwrap().is_empty());
    }
}
