use chrono::{DateTime, Utc};
use postbot_core::{PostId, TransitionError};
use thiserror::Error;

/// Errors that can occur within the post store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `append` was given an id that already exists.
    #[error("Duplicate post id: {id}")]
    DuplicateId { id: PostId },

    /// No post with the given id exists.
    #[error("Post not found: {id}")]
    NotFound { id: PostId },

    /// The mutator asked for a status move the state machine forbids.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// A claim was attempted before the post's schedule time.
    #[error("Post {id} is not due until {schedule_time}")]
    NotDue {
        id: PostId,
        schedule_time: DateTime<Utc>,
    },

    /// The mutator tried to change a field that is fixed at creation.
    #[error("Post {id}: field `{field}` is immutable")]
    ImmutableField { id: PostId, field: &'static str },

    /// A stored row could not be decoded.
    #[error("Corrupt row for post {id}: {reason}")]
    Corrupt { id: PostId, reason: String },

    /// The backend cannot be used at all (e.g. poisoned connection lock).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
