use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use postbot_core::{config::SchedulerConfig, PostId, PostSnapshot, PostStatus};
use postbot_store::{PostStore, StoreError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    collab::{CaptionGenerator, Publisher},
    error::Result,
    pipeline::{Pipeline, PipelineOutcome},
};

/// `error_detail` written on posts recovered from a stale `processing` state.
pub const STALE_PROCESSING_REASON: &str = "processing interrupted before completion";

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Due posts found by this tick.
    pub selected: usize,
    pub posted: usize,
    pub failed: usize,
    /// Claimed by another writer between listing and claiming, or not due.
    pub skipped: usize,
    /// Claimed by this tick, then a later checkpoint could not be written.
    pub interrupted: usize,
    /// Pipeline errors before anything was written.
    pub errors: usize,
    /// Stale `processing` posts moved to `failed`.
    pub recovered: usize,
}

/// Coarse classification of a tick, for whoever refreshes dependent views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NoChange,
    Changed,
    /// At least one post reached `failed` during the tick.
    ChangedWithFailures,
}

impl TickReport {
    /// Whether any post changed state during the tick.
    pub fn changed(&self) -> bool {
        self.posted + self.failed + self.interrupted + self.recovered > 0
    }

    pub fn outcome(&self) -> TickOutcome {
        if self.failed + self.recovered > 0 {
            TickOutcome::ChangedWithFailures
        } else if self.changed() {
            TickOutcome::Changed
        } else {
            TickOutcome::NoChange
        }
    }
}

/// Due-item scanner: lists the store on a fixed cadence and runs every due
/// post through the [`Pipeline`], one at a time.
pub struct SchedulerEngine {
    store: Arc<dyn PostStore>,
    pipeline: Pipeline,
    tick_interval: Duration,
    stale_after: Option<chrono::Duration>,
    /// If set, every tick that changed something is reported here.
    reports_tx: Option<mpsc::Sender<TickReport>>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn PostStore>,
        captioner: Arc<dyn CaptionGenerator>,
        publisher: Arc<dyn Publisher>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            pipeline: Pipeline::new(Arc::clone(&store), captioner, publisher),
            store,
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            stale_after: config.stale_processing_secs.and_then(stale_threshold),
            reports_tx: None,
        }
    }

    /// Send a copy of every non-idle [`TickReport`] to `tx`.
    ///
    /// Delivery uses `try_send`, so a slow consumer never stalls the loop.
    pub fn with_reports(mut self, tx: mpsc::Sender<TickReport>) -> Self {
        self.reports_tx = Some(tx);
        self
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one scan as if the clock read `now`.
    ///
    /// Returns `Err` only when the store cannot be listed; per-post problems
    /// are counted in the report and the tick moves on to the next post.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let posts = self.store.list()?;
        let mut report = TickReport::default();

        if let Some(stale_after) = self.stale_after {
            report.recovered = self.recover_stale(&posts, now, stale_after);
        }

        let due: Vec<PostId> = posts
            .iter()
            .filter(|p| p.is_due(now))
            .map(|p| p.id.clone())
            .collect();
        report.selected = due.len();

        for id in due {
            match self.pipeline.process_at(&id, now).await {
                Ok(PipelineOutcome::Posted { .. }) => report.posted += 1,
                Ok(PipelineOutcome::Failed { .. }) => report.failed += 1,
                Ok(PipelineOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(post_id = %id, "pipeline error: {e}");
                    if e.claimed() {
                        report.interrupted += 1;
                    } else {
                        report.errors += 1;
                    }
                }
            }
        }

        if report.selected > 0 || report.recovered > 0 {
            info!(
                selected = report.selected,
                posted = report.posted,
                failed = report.failed,
                skipped = report.skipped,
                interrupted = report.interrupted,
                errors = report.errors,
                recovered = report.recovered,
                "scheduler tick complete"
            );
        }
        Ok(report)
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true` or a tick
    /// fails fatally; the fatal error is returned to the task's owner.
    ///
    /// A tick runs to completion before the next one starts, so a post is
    /// never in two pipeline runs from this engine at once.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(interval_secs = self.tick_interval.as_secs(), "scheduler engine started");

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => self.forward(report),
                        Err(e) => {
                            error!("scheduler tick failed, stopping engine: {e}");
                            return Err(e);
                        }
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    fn forward(&self, report: TickReport) {
        if !report.changed() {
            return;
        }
        if let Some(ref tx) = self.reports_tx {
            if tx.try_send(report).is_err() {
                warn!("tick report channel full or closed, report dropped");
            }
        }
    }

    /// Mark posts stuck in `processing` for longer than `stale_after` as
    /// failed. They are not re-run: the publish call may already have gone
    /// out before the process died.
    fn recover_stale(
        &self,
        posts: &[PostSnapshot],
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> usize {
        let mut recovered = 0;
        for post in posts
            .iter()
            .filter(|p| p.status == PostStatus::Processing && is_stale(p, now, stale_after))
        {
            let result = self.store.update(&post.id, &|r| {
                Ok(r.fail(STALE_PROCESSING_REASON, r.caption.clone(), now)?)
            });
            match result {
                Ok(_) => {
                    warn!(post_id = %post.id, since = %post.updated_at, "stale processing post marked failed");
                    recovered += 1;
                }
                // finished by its owner since we listed
                Err(StoreError::InvalidTransition(_)) => {
                    debug!(post_id = %post.id, "stale candidate already resolved");
                }
                Err(e) => warn!(post_id = %post.id, "stale recovery failed: {e}"),
            }
        }
        recovered
    }
}

/// Recovery threshold for `stale_processing_secs`. A value too large to
/// represent disables recovery.
fn stale_threshold(secs: u64) -> Option<chrono::Duration> {
    let threshold = i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds);
    if threshold.is_none() {
        warn!(secs, "stale_processing_secs out of range, stale recovery disabled");
    }
    threshold
}

/// A deadline past the end of the calendar is never reached.
fn is_stale(post: &PostSnapshot, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
    post.updated_at
        .checked_add_signed(stale_after)
        .is_some_and(|deadline| deadline <= now)
}
