//! External collaborator boundaries called by the pipeline.

use async_trait::async_trait;
use postbot_core::{Credential, MediaBlob};
use thiserror::Error;

/// Caption generation failed. `reason` is stored verbatim as the post's
/// `error_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct GenerationError {
    pub reason: String,
}

impl GenerationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Publishing failed. `reason` is stored verbatim as the post's
/// `error_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct PublishError {
    pub reason: String,
}

impl PublishError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Turns media into caption text.
#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    async fn generate_caption(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, GenerationError>;
}

/// Hands a finished post to the publishing service.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    async fn publish(
        &self,
        caption: &str,
        media: &MediaBlob,
        credential: &Credential,
    ) -> Result<(), PublishError>;
}
