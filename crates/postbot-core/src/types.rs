use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, TransitionError};

/// Unique identifier for a scheduled post (UUIDv4 when generated).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for PostId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Broad media family, derived from the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// `image/*` → Image, `video/*` → Video, anything else → None.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let top = mime_type.split('/').next()?.trim().to_ascii_lowercase();
        match top.as_str() {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Opaque encoded media payload. Immutable once attached to a post.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaBlob {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime_type)
    }

    pub fn info(&self) -> MediaInfo {
        MediaInfo {
            mime_type: self.mime_type.clone(),
            size_bytes: self.bytes.len() as u64,
        }
    }
}

// Payloads run to tens of megabytes; never dump them into logs.
impl fmt::Debug for MediaBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBlob")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Media summary exposed to observers in place of the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Publisher access token stored alongside a post.
///
/// `Debug` never prints the value and the backing memory is zeroed on drop.
/// The only way to read it is [`Credential::expose`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a post. Transitions only move forward:
/// `Scheduled → Processing → {Posted, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    /// Waiting for its schedule time.
    Scheduled,
    /// Claimed by a pipeline run; caption/publish in flight.
    Processing,
    /// Published successfully.
    Posted,
    /// Caption generation or publishing failed; see `error_detail`.
    Failed,
}

impl PostStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PostStatus::Posted | PostStatus::Failed)
    }

    pub fn can_transition_to(self, next: PostStatus) -> bool {
        matches!(
            (self, next),
            (PostStatus::Scheduled, PostStatus::Processing)
                | (PostStatus::Processing, PostStatus::Posted)
                | (PostStatus::Processing, PostStatus::Failed)
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Processing => "processing",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PostStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PostStatus::Scheduled),
            "processing" => Ok(PostStatus::Processing),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A persisted post, including the fields observers must never see.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub id: PostId,
    pub media: MediaBlob,
    pub schedule_time: DateTime<Utc>,
    pub status: PostStatus,
    /// Set together with the terminal status, once the caption step succeeded.
    pub caption: Option<String>,
    /// Set only when `status` is `Failed`.
    pub error_detail: Option<String>,
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostRecord {
    /// A fresh `Scheduled` record.
    pub fn new(
        id: PostId,
        media: MediaBlob,
        schedule_time: DateTime<Utc>,
        credential: Credential,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            media,
            schedule_time,
            status: PostStatus::Scheduled,
            caption: None,
            error_detail: None,
            credential,
            created_at: now,
            updated_at: now,
        }
    }

    /// Still `Scheduled` and the schedule time has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.schedule_time <= now
    }

    /// `Scheduled → Processing`. Fails for any other current status, which is
    /// how a second writer learns that the post was already claimed.
    pub fn claim(&self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.transition(PostStatus::Processing, now)
    }

    /// `Processing → Posted` with the caption that was published.
    pub fn post(&self, caption: String, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        let mut next = self.transition(PostStatus::Posted, now)?;
        next.caption = Some(caption);
        Ok(next)
    }

    /// `Processing → Failed`. `caption` is `Some` when the failure happened
    /// after the caption step succeeded.
    pub fn fail(
        &self,
        reason: impl Into<String>,
        caption: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        let mut next = self.transition(PostStatus::Failed, now)?;
        next.caption = caption;
        next.error_detail = Some(reason.into());
        Ok(next)
    }

    pub fn snapshot(&self) -> PostSnapshot {
        PostSnapshot::from(self)
    }

    fn transition(&self, to: PostStatus, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        next.updated_at = now;
        Ok(next)
    }
}

/// Redacted, point-in-time view of a post. Safe for any observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub id: PostId,
    pub media: MediaInfo,
    pub schedule_time: DateTime<Utc>,
    pub status: PostStatus,
    pub caption: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostSnapshot {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.schedule_time <= now
    }
}

impl From<&PostRecord> for PostSnapshot {
    fn from(r: &PostRecord) -> Self {
        Self {
            id: r.id.clone(),
            media: r.media.info(),
            schedule_time: r.schedule_time,
            status: r.status,
            caption: r.caption.clone(),
            error_detail: r.error_detail.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
