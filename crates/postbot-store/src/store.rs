use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use postbot_core::{
    Credential, MediaBlob, MediaInfo, PostId, PostRecord, PostSnapshot, PostStatus,
    TransitionError,
};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    db,
    error::{Result, StoreError},
};

/// One row of the change log: "post `post_id` was written".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub seq: u64,
    pub post_id: PostId,
    pub changed_at: DateTime<Utc>,
}

/// Durable keyed collection of posts.
///
/// `append` and `update` are the only mutation paths and the only lock /
/// transaction boundary. Implementations must make a write visible to every
/// reader of the same medium, in any process, once the call returns.
pub trait PostStore: Send + Sync {
    /// Identity of the persistence medium (e.g. the database path).
    fn medium(&self) -> &str;

    /// Insert a new record. Fails with `DuplicateId` if the id exists.
    fn append(&self, record: &PostRecord) -> Result<()>;

    /// All posts in creation order, credential-free.
    fn list(&self) -> Result<Vec<PostSnapshot>>;

    /// Full internal record, including media and credential.
    fn get(&self, id: &PostId) -> Result<PostRecord>;

    /// Atomically read, transform and persist one record.
    ///
    /// `mutate` must be pure: it may run under the backend's write lock.
    /// Returning an error from it aborts the update without writing.
    fn update(
        &self,
        id: &PostId,
        mutate: &dyn Fn(&PostRecord) -> Result<PostRecord>,
    ) -> Result<PostRecord>;

    /// Change-log entries with `seq > after`, oldest first.
    fn changes_since(&self, after: u64) -> Result<Vec<ChangeEntry>>;

    /// Highest change-log sequence number, 0 when nothing was written yet.
    fn latest_change(&self) -> Result<u64>;

    /// Delete change-log entries recorded before `before`. Returns how many
    /// were removed. Sequence numbers are never reused afterwards.
    fn prune_changes(&self, _before: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }

    /// Local write counter, bumped after every committed write so watchers
    /// need not wait for their next poll. Every receiver sees every bump.
    /// Backends without one rely on polling alone.
    fn write_notifier(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Check a mutator's output against the record it was given.
///
/// Creation-time fields must be untouched and the status may only stay put
/// or make a legal move. Terminal records are frozen.
pub fn verify_update(current: &PostRecord, next: &PostRecord) -> Result<()> {
    let immutable = [
        ("id", current.id == next.id),
        ("media", current.media == next.media),
        ("schedule_time", current.schedule_time == next.schedule_time),
        ("credential", current.credential == next.credential),
        ("created_at", current.created_at == next.created_at),
    ];
    for (field, same) in immutable {
        if !same {
            return Err(StoreError::ImmutableField {
                id: current.id.clone(),
                field,
            });
        }
    }

    let status_ok = if current.status == next.status {
        !current.status.is_terminal() || current == next
    } else {
        current.status.can_transition_to(next.status)
    };
    if !status_ok {
        return Err(TransitionError {
            id: current.id.clone(),
            from: current.status,
            to: next.status,
        }
        .into());
    }
    Ok(())
}

/// SQLite-backed [`PostStore`].
///
/// Thread-safe: wraps one connection in a `Mutex`. Cross-process safety comes
/// from SQLite itself: every mutation runs in a `BEGIN IMMEDIATE`
/// transaction, which takes the database write lock up front.
pub struct SqlitePostStore {
    conn: Mutex<Connection>,
    medium: String,
    written: watch::Sender<u64>,
}

impl SqlitePostStore {
    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection, medium: impl Into<String>) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            medium: medium.into(),
            written: watch::Sender::new(0),
        })
    }

    /// Open the database file at `path` with the standard pragmas.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self> {
        let conn = db::open(path, busy_timeout)?;
        Self::new(conn, path)
    }

    /// Private in-memory database; nothing outside this instance can see it.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?, ":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn load(conn: &Connection, id: &PostId) -> Result<Option<PostRecord>> {
        let raw = conn
            .query_row(
                "SELECT id, mime_type, media, schedule_time, status, caption,
                        error_detail, credential, created_at, updated_at
                 FROM posts WHERE id = ?1",
                [id.as_str()],
                |row| {
                    Ok(RawPost {
                        id: row.get(0)?,
                        mime_type: row.get(1)?,
                        media: row.get(2)?,
                        schedule_time: row.get(3)?,
                        status: row.get(4)?,
                        caption: row.get(5)?,
                        error_detail: row.get(6)?,
                        credential: row.get(7)?,
                        created_at: row.get(8)?,
                        updated_at: row.get(9)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawPost::into_record).transpose()
    }
}

fn record_change(conn: &Connection, id: &PostId, at: &DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO post_changes (post_id, changed_at) VALUES (?1, ?2)",
        rusqlite::params![id.as_str(), ts(at)],
    )?;
    Ok(())
}

impl PostStore for SqlitePostStore {
    fn medium(&self) -> &str {
        &self.medium
    }

    fn append(&self, record: &PostRecord) -> Result<()> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
                [record.id.as_str()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::DuplicateId {
                    id: record.id.clone(),
                });
            }

            tx.execute(
                "INSERT INTO posts
                 (id, mime_type, media, schedule_time, status, caption,
                  error_detail, credential, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                rusqlite::params![
                    record.id.as_str(),
                    record.media.mime_type,
                    record.media.bytes,
                    ts(&record.schedule_time),
                    record.status.to_string(),
                    record.caption,
                    record.error_detail,
                    record.credential.expose(),
                    ts(&record.created_at),
                    ts(&record.updated_at),
                ],
            )?;
            record_change(&tx, &record.id, &record.updated_at)?;
            tx.commit()?;
        }
        self.written.send_modify(|n| *n = n.wrapping_add(1));

        info!(
            post_id = %record.id,
            schedule_time = %record.schedule_time,
            size = record.media.len(),
            "post appended"
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<PostSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, mime_type, length(media), schedule_time, status, caption,
                    error_detail, created_at, updated_at
             FROM posts ORDER BY seq",
        )?;
        let posts = stmt
            .query_map([], |row| {
                Ok(RawSnapshot {
                    id: row.get(0)?,
                    mime_type: row.get(1)?,
                    size_bytes: row.get(2)?,
                    schedule_time: row.get(3)?,
                    status: row.get(4)?,
                    caption: row.get(5)?,
                    error_detail: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })?
            .filter_map(|r| match r.map_err(StoreError::from).and_then(RawSnapshot::into_snapshot) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("skipping unreadable post row: {e}");
                    None
                }
            })
            .collect();
        Ok(posts)
    }

    fn get(&self, id: &PostId) -> Result<PostRecord> {
        let conn = self.lock()?;
        Self::load(&conn, id)?.ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    fn update(
        &self,
        id: &PostId,
        mutate: &dyn Fn(&PostRecord) -> Result<PostRecord>,
    ) -> Result<PostRecord> {
        let next = {
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current =
                Self::load(&tx, id)?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
            let next = mutate(&current)?;
            verify_update(&current, &next)?;

            tx.execute(
                "UPDATE posts SET status = ?1, caption = ?2, error_detail = ?3, updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    next.status.to_string(),
                    next.caption,
                    next.error_detail,
                    ts(&next.updated_at),
                    id.as_str(),
                ],
            )?;
            record_change(&tx, id, &next.updated_at)?;
            tx.commit()?;

            debug!(post_id = %id, from = %current.status, to = %next.status, "post updated");
            next
        };
        self.written.send_modify(|n| *n = n.wrapping_add(1));
        Ok(next)
    }

    fn changes_since(&self, after: u64) -> Result<Vec<ChangeEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT seq, post_id, changed_at FROM post_changes
             WHERE seq > ?1 ORDER BY seq",
        )?;
        let rows: Vec<(i64, String, String)> = stmt
            .query_map([after as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(seq, post_id, changed_at)| {
                let post_id = PostId::from(post_id);
                Ok(ChangeEntry {
                    seq: seq as u64,
                    changed_at: parse_ts(&post_id, &changed_at)?,
                    post_id,
                })
            })
            .collect()
    }

    fn latest_change(&self) -> Result<u64> {
        let conn = self.lock()?;
        let seq: i64 =
            conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM post_changes", [], |row| {
                row.get(0)
            })?;
        Ok(seq as u64)
    }

    fn prune_changes(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        // fixed-width UTC timestamps compare correctly as text
        let removed = conn.execute(
            "DELETE FROM post_changes WHERE changed_at < ?1",
            [ts(&before)],
        )?;
        if removed > 0 {
            debug!(removed, "change log pruned");
        }
        Ok(removed)
    }

    fn write_notifier(&self) -> Option<watch::Receiver<u64>> {
        Some(self.written.subscribe())
    }
}

// --- row decoding ----------------------------------------------------------

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(id: &PostId, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("bad timestamp {s:?}: {e}"),
        })
}

fn parse_status(id: &PostId, s: &str) -> Result<PostStatus> {
    s.parse().map_err(|e: postbot_core::CoreError| StoreError::Corrupt {
        id: id.clone(),
        reason: e.to_string(),
    })
}

struct RawPost {
    id: String,
    mime_type: String,
    media: Vec<u8>,
    schedule_time: String,
    status: String,
    caption: Option<String>,
    error_detail: Option<String>,
    credential: String,
    created_at: String,
    updated_at: String,
}

impl RawPost {
    fn into_record(self) -> Result<PostRecord> {
        let id = PostId::from(self.id);
        Ok(PostRecord {
            media: MediaBlob::new(self.mime_type, self.media),
            schedule_time: parse_ts(&id, &self.schedule_time)?,
            status: parse_status(&id, &self.status)?,
            caption: self.caption,
            error_detail: self.error_detail,
            credential: Credential::new(self.credential),
            created_at: parse_ts(&id, &self.created_at)?,
            updated_at: parse_ts(&id, &self.updated_at)?,
            id,
        })
    }
}

struct RawSnapshot {
    id: String,
    mime_type: String,
    size_bytes: i64,
    schedule_time: String,
    status: String,
    caption: Option<String>,
    error_detail: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawSnapshot {
    fn into_snapshot(self) -> Result<PostSnapshot> {
        let id = PostId::from(self.id);
        Ok(PostSnapshot {
            media: MediaInfo {
                mime_type: self.mime_type,
                size_bytes: self.size_bytes.max(0) as u64,
            },
            schedule_time: parse_ts(&id, &self.schedule_time)?,
            status: parse_status(&id, &self.status)?,
            caption: self.caption,
            error_detail: self.error_detail,
            created_at: parse_ts(&id, &self.created_at)?,
            updated_at: parse_ts(&id, &self.updated_at)?,
            id,
        })
    }
}
