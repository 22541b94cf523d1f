use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::error::StoreResult;
use crate::models::UserDisputeStats;

const AUTOBAN_LOSS_STREAK: u32 = 3;

pub fn get_or_default(conn: &Connection, user_id: &str) -> StoreResult<UserDisputeStats> {
    let existing = conn
        .query_row(
            "SELECT user_id, win_streak, loss_streak, blacklisted FROM users WHERE user_id = :user_id",
            named_params! { ":user_id": user_id },
            row_to_stats,
        )
        .optional()?;

    Ok(existing.unwrap_or(UserDisputeStats {
        user_id: user_id.to_string(),
        win_streak: 0,
        loss_streak: 0,
        blacklisted: false,
    }))
}

/// Records a dispute outcome for a user and applies the autoban rule: three
/// consecutive losses blacklists the user from opening future deals.
pub fn record_outcome(conn: &Connection, user_id: &str, won: bool) -> StoreResult<UserDisputeStats> {
    let mut stats = get_or_default(conn, user_id)?;

    if won {
        stats.win_streak += 1;
        stats.loss_streak = 0;
    } else {
        stats.loss_streak += 1;
        stats.win_streak = 0;
        if stats.loss_streak >= AUTOBAN_LOSS_STREAK {
            stats.blacklisted = true;
        }
    }

    conn.execute(
        r#"
        INSERT INTO users (user_id, win_streak, loss_streak, blacklisted)
        VALUES (:user_id, :win_streak, :loss_streak, :blacklisted)
        ON CONFLICT(user_id) DO UPDATE SET
            win_streak = excluded.win_streak,
            loss_streak = excluded.loss_streak,
            blacklisted = excluded.blacklisted
        "#,
        named_params! {
            ":user_id": user_id,
            ":win_streak": stats.win_streak,
            ":loss_streak": stats.loss_streak,
            ":blacklisted": stats.blacklisted,
        },
    )?;

    Ok(stats)
}

pub fn list_all(conn: &Connection) -> StoreResult<Vec<UserDisputeStats>> {
    let mut stmt = conn.prepare_cached("SELECT user_id, win_streak, loss_streak, blacklisted FROM users ORDER BY user_id ASC")?;
    let rows = stmt.query_map([], row_to_stats)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn row_to_stats(row: &rusqlite::Row) -> rusqlite::Result<UserDisputeStats> {
    Ok(UserDisputeStats {
        user_id: row.get(0)?,
        win_streak: row.get::<_, i64>(1)? as u32,
        loss_streak: row.get::<_, i64>(2)? as u32,
        blacklisted: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::tempdir;

    #[test]
    fn three_consecutive_losses_autobans() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("users.db")).unwrap();
        let conn = pool.get().unwrap();

        record_outcome(&conn, "u1", false).unwrap();
        record_outcome(&conn, "u1", false).unwrap();
        let stats = record_outcome(&conn, "u1", false).unwrap();

        assert_eq!(stats.loss_streak, 3);
        assert!(stats.blacklisted);
    }

    #[test]
    fn a_win_resets_the_loss_streak() {
        let dir = tempdir().unwrap();
        let pool = init_db(dir.path().join("users2.db")).unwrap();
        let conn = pool.get().unwrap();

        record_outcome(&conn, "u2", false).unwrap();
        record_outcome(&conn, "u2", false).unwrap();
        let stats = record_outcome(&conn, "u2", true).unwrap();

        assert_eq!(stats.loss_streak, 0);
        assert!(!stats.blacklisted);
    }
}
