use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use postbot_core::{PostId, PostRecord, PostStatus};
use postbot_store::{PostStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    collab::{CaptionGenerator, Publisher},
    error::PipelineError,
};

/// Pipeline step a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Claim,
    Caption,
    Publish,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Claim => "claim",
            Step::Caption => "caption",
            Step::Publish => "publish",
        };
        write!(f, "{s}")
    }
}

/// Which collaborator turned the post into `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Caption,
    Publish,
}

/// How a single pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Posted { caption: String },
    Failed { stage: FailureStage, reason: String },
    /// Not claimable: someone else moved the post out of `scheduled` first,
    /// or its schedule time has not arrived. Nothing written.
    Skipped,
}

/// Per-post state machine: claim, caption, publish.
///
/// Holds no lock across collaborator calls; the claim checkpoint is what
/// makes the post "owned" by this run.
pub struct Pipeline {
    store: Arc<dyn PostStore>,
    captioner: Arc<dyn CaptionGenerator>,
    publisher: Arc<dyn Publisher>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PostStore>,
        captioner: Arc<dyn CaptionGenerator>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            captioner,
            publisher,
        }
    }

    /// Drive one post from `scheduled` to a terminal state.
    ///
    /// Collaborator failures are recorded on the post and reported as
    /// [`PipelineOutcome::Failed`]; only store failures return `Err`.
    pub async fn process(&self, id: &PostId) -> Result<PipelineOutcome, PipelineError> {
        self.process_at(id, Utc::now()).await
    }

    /// Like [`process`](Self::process) with the clock reading `now` for the
    /// claim. A post whose schedule time is after `now` is skipped.
    pub async fn process_at(
        &self,
        id: &PostId,
        now: DateTime<Utc>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let claimed = match self.store.update(id, &|r| claim_due(r, now)) {
            Ok(record) => record,
            Err(StoreError::InvalidTransition(e)) => {
                debug!(post_id = %id, status = %e.from, "post already claimed, skipping");
                return Ok(PipelineOutcome::Skipped);
            }
            Err(StoreError::NotDue { schedule_time, .. }) => {
                debug!(post_id = %id, %schedule_time, "post not due yet, skipping");
                return Ok(PipelineOutcome::Skipped);
            }
            Err(source) => {
                return Err(PipelineError {
                    post_id: id.clone(),
                    step: Step::Claim,
                    source,
                })
            }
        };
        info!(
            post_id = %id,
            captioner = self.captioner.name(),
            mime_type = %claimed.media.mime_type,
            "post claimed, generating caption"
        );

        let caption = match self
            .captioner
            .generate_caption(&claimed.media.bytes, &claimed.media.mime_type)
            .await
        {
            Ok(caption) => caption,
            Err(e) => {
                warn!(post_id = %id, reason = %e.reason, "caption generation failed");
                let now = Utc::now();
                self.checkpoint(id, Step::Caption, &|r| {
                    Ok(r.fail(e.reason.clone(), None, now)?)
                })?;
                return Ok(PipelineOutcome::Failed {
                    stage: FailureStage::Caption,
                    reason: e.reason,
                });
            }
        };
        debug!(post_id = %id, publisher = self.publisher.name(), "caption ready, publishing");

        match self
            .publisher
            .publish(&caption, &claimed.media, &claimed.credential)
            .await
        {
            Ok(()) => {
                let now = Utc::now();
                self.checkpoint(id, Step::Publish, &|r| Ok(r.post(caption.clone(), now)?))?;
                info!(post_id = %id, "post published");
                Ok(PipelineOutcome::Posted { caption })
            }
            Err(e) => {
                warn!(post_id = %id, reason = %e.reason, "publish failed");
                let now = Utc::now();
                self.checkpoint(id, Step::Publish, &|r| {
                    Ok(r.fail(e.reason.clone(), Some(caption.clone()), now)?)
                })?;
                Ok(PipelineOutcome::Failed {
                    stage: FailureStage::Publish,
                    reason: e.reason,
                })
            }
        }
    }

    fn checkpoint(
        &self,
        id: &PostId,
        step: Step,
        mutate: &dyn Fn(&PostRecord) -> postbot_store::Result<PostRecord>,
    ) -> Result<(), PipelineError> {
        self.store
            .update(id, mutate)
            .map(|_| ())
            .map_err(|source| PipelineError {
                post_id: id.clone(),
                step,
                source,
            })
    }
}

/// `Scheduled → Processing`, only once the schedule time has passed.
fn claim_due(r: &PostRecord, now: DateTime<Utc>) -> postbot_store::Result<PostRecord> {
    if r.status == PostStatus::Scheduled && r.schedule_time > now {
        return Err(StoreError::NotDue {
            id: r.id.clone(),
            schedule_time: r.schedule_time,
        });
    }
    Ok(r.claim(now)?)
}
