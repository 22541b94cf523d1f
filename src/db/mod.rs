//! Persistence layer: connection pool, migrations, and one query module per aggregate.
//!
//! Mirrors the teacher's `db` layer shape (one file per aggregate, `named_params!`
//! queries, a shared pool type) but built on `rusqlite` + `r2d2` end to end rather
//! than the teacher's inconsistent `sqlx`/`rusqlite` split.

use std::{env::current_dir, fs, path::Path};

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite_migration::Migrations;

pub mod alerts;
pub mod audit;
pub mod deals;
pub mod error;
pub mod notifications;
pub mod sessions;
pub mod transactions;
pub mod users;
pub mod wallets;

pub use error::{StoreError, StoreResult};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// SQLite stores `datetime('now')`-style strings with a space separator;
/// rusqlite's own chrono feature expects `T`. Parse both forms defensively.
pub(crate) fn parse_naive(s: &str) -> chrono::NaiveDateTime {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .unwrap_or_else(|_| chrono::Utc::now().naive_utc())
}

const MIGRATION_SQL: &[(&str, &str)] = &[
    ("001_deals", include_str!("../../migrations/001_deals.sql")),
    ("002_wallets_and_transactions", include_str!("../../migrations/002_wallets_and_transactions.sql")),
    ("003_audit_and_sessions", include_str!("../../migrations/003_audit_and_sessions.sql")),
    ("004_users_and_notifications", include_str!("../../migrations/004_users_and_notifications.sql")),
    ("005_alerts", include_str!("../../migrations/005_alerts.sql")),
    ("006_payout_and_commission", include_str!("../../migrations/006_payout_and_commission.sql")),
];

fn migrations() -> Migrations<'static> {
    Migrations::new(
        MIGRATION_SQL
            .iter()
            .map(|(_name, sql)| rusqlite_migration::M::up(sql))
            .collect(),
    )
}

/// Opens (creating if needed) the SQLite database at `db_path`, applies all
/// pending migrations, and returns a pooled handle.
pub fn init_db<P: AsRef<Path>>(db_path: P) -> StoreResult<SqlitePool> {
    let mut path = db_path.as_ref().to_path_buf();
    if path.is_relative() {
        path = current_dir()?.join(path);
    }
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidInput("invalid database file path".into()))?;
    fs::create_dir_all(parent)?;

    let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
    });
    let pool = r2d2::Pool::builder().max_size(8).build(manager)?;

    let mut conn = pool.get()?;
    migrations().to_latest(&mut conn)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_db_runs_migrations_idempotently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("escrow.db");

        let pool = init_db(&path).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='deals'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        drop(conn);

        // Re-opening must not fail or re-apply migrations destructively.
        let pool2 = init_db(&path).unwrap();
        let conn2 = pool2.get().unwrap();
        let count2: i64 = conn2
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='deals'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count2, 1);
    }
}
