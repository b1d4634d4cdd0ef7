use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// Open (or create) the database file with the pragmas the store relies on.
///
/// WAL lets readers in other processes proceed while one process writes;
/// `synchronous=FULL` makes every commit durable before the call returns;
/// the busy timeout makes a second writer wait for the lock instead of
/// failing with `SQLITE_BUSY`.
pub fn open(path: &str, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    Ok(conn)
}

/// Initialise the post schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS posts (
            seq            INTEGER PRIMARY KEY AUTOINCREMENT,
            id             TEXT    NOT NULL UNIQUE,
            mime_type      TEXT    NOT NULL,
            media          BLOB    NOT NULL,
            schedule_time  TEXT    NOT NULL,   -- RFC 3339 UTC
            status         TEXT    NOT NULL DEFAULT 'scheduled',
            caption        TEXT,
            error_detail   TEXT,
            credential     TEXT    NOT NULL,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_posts_status ON posts (status, schedule_time);

        -- One row per committed write; tailed by every process's watcher.
        -- Grows until trimmed by age (PostStore::prune_changes).
        CREATE TABLE IF NOT EXISTS post_changes (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id     TEXT    NOT NULL,
            changed_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
