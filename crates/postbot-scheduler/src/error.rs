use postbot_core::PostId;
use postbot_store::StoreError;
use thiserror::Error;

use crate::pipeline::Step;

/// Errors surfaced by `schedule_post`, `list_posts` and the scan loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule time is not strictly in the future.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The media payload exceeds the configured ceiling.
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Empty payload or a MIME type that is neither image nor video.
    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    /// Store failure. Fatal to the scan loop when raised by a tick.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    /// Short error code string for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            SchedulerError::InvalidMedia(_) => "INVALID_MEDIA",
            SchedulerError::Store(StoreError::DuplicateId { .. }) => "DUPLICATE_ID",
            SchedulerError::Store(StoreError::NotFound { .. }) => "NOT_FOUND",
            SchedulerError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// A pipeline run that could not record its result for one post.
///
/// Contained by the scanner: logged, counted, and the tick moves on.
#[derive(Debug, Error)]
#[error("post {post_id}: {step} checkpoint failed: {source}")]
pub struct PipelineError {
    pub post_id: PostId,
    pub step: Step,
    #[source]
    pub source: StoreError,
}

impl PipelineError {
    /// Whether the post had already been moved to `processing`.
    pub fn claimed(&self) -> bool {
        self.step != Step::Claim
    }
}
