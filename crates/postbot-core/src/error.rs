use thiserror::Error;

use crate::types::{PostId, PostStatus};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown post status: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A status change the post state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("post {id}: illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub id: PostId,
    pub from: PostStatus,
    pub to: PostStatus,
}
