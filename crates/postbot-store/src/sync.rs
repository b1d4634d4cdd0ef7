//! View synchronisation: redacted snapshots plus a change feed that also
//! carries writes made by other processes sharing the same database.
//!
//! Notifications are triggers, not data: a [`StoreChange`] only says which
//! medium and which post changed. Observers re-read [`ViewSync::snapshot`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use postbot_core::{PostId, PostSnapshot};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{error::Result, store::PostStore};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// How often a running watcher trims the change log when retention is set.
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// "Post `post_id` changed in `medium`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreChange {
    pub medium: String,
    pub post_id: PostId,
}

/// Read-only facade for observers (UI, other services).
#[derive(Clone)]
pub struct ViewSync {
    store: Arc<dyn PostStore>,
    tx: broadcast::Sender<StoreChange>,
}

impl ViewSync {
    pub fn new(store: Arc<dyn PostStore>) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { store, tx }
    }

    /// Point-in-time, credential-free copy of every post.
    pub fn snapshot(&self) -> Result<Vec<PostSnapshot>> {
        self.store.list()
    }

    /// Register for change notifications. Only changes published after this
    /// call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }

    /// Build the watcher that feeds this synchroniser. It starts at the
    /// current end of the change log.
    pub fn watcher(&self, poll_interval: Duration) -> Result<ChangeWatcher> {
        Ok(ChangeWatcher {
            last_seen: self.store.latest_change()?,
            local_writes: self.store.write_notifier(),
            store: Arc::clone(&self.store),
            tx: self.tx.clone(),
            poll_interval,
            retention: None,
        })
    }
}

/// Tails the store's change log and broadcasts each new entry.
pub struct ChangeWatcher {
    store: Arc<dyn PostStore>,
    tx: broadcast::Sender<StoreChange>,
    last_seen: u64,
    poll_interval: Duration,
    local_writes: Option<watch::Receiver<u64>>,
    retention: Option<chrono::Duration>,
}

impl ChangeWatcher {
    /// Trim change-log entries older than `retention` while running.
    ///
    /// Every process sharing the database tails the same log, so a watcher
    /// that falls further behind than `retention` misses the trimmed
    /// entries; its observers still converge on the next snapshot.
    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Drop change-log entries older than the retention window, if one is
    /// set. Returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        match Utc::now().checked_sub_signed(retention) {
            Some(cutoff) => self.store.prune_changes(cutoff),
            None => Ok(0),
        }
    }

    /// Publish every change-log entry written since the last poll, from any
    /// process. Returns how many were published.
    pub fn poll(&mut self) -> Result<usize> {
        let changes = self.store.changes_since(self.last_seen)?;
        for change in &changes {
            // no subscribers is fine
            let _ = self.tx.send(StoreChange {
                medium: self.store.medium().to_string(),
                post_id: change.post_id.clone(),
            });
            self.last_seen = change.seq;
        }
        if !changes.is_empty() {
            debug!(count = changes.len(), last_seen = self.last_seen, "store changes published");
        }
        Ok(changes.len())
    }

    /// Poll until `shutdown` broadcasts `true`. Wakes early on local writes.
    ///
    /// Poll errors are logged and retried on the next wake-up; observers are
    /// never the reason the process stops.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(medium = %self.store.medium(), "change watcher started");
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut prune_interval = tokio::time::interval(PRUNE_INTERVAL);
        prune_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut local_writes = self.local_writes.take();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = local_write(&mut local_writes) => {}
                _ = prune_interval.tick(), if self.retention.is_some() => {
                    if let Err(e) = self.prune() {
                        warn!("change log prune failed: {e}");
                    }
                    continue;
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("change watcher shutting down");
                        break;
                    }
                    continue;
                }
            }
            if let Err(e) = self.poll() {
                warn!("change watcher poll failed: {e}");
            }
        }
    }
}

async fn local_write(writes: &mut Option<watch::Receiver<u64>>) {
    match writes {
        Some(rx) => {
            if rx.changed().await.is_err() {
                // store dropped its sender; fall back to polling
                *writes = None;
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}
