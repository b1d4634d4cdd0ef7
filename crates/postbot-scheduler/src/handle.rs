use std::sync::Arc;

use chrono::{DateTime, Utc};
use postbot_core::{Credential, MediaBlob, PostId, PostRecord, PostSnapshot};
use postbot_store::PostStore;
use tracing::info;

use crate::error::{Result, SchedulerError};

/// A request to publish `media` once `schedule_time` has passed.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Caller-chosen id; a fresh UUID is generated when `None`.
    pub id: Option<PostId>,
    pub media: MediaBlob,
    pub schedule_time: DateTime<Utc>,
    pub credential: Credential,
}

/// Shared handle for request handlers (schedule/list) while the engine loop
/// runs. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn PostStore>,
    max_media_bytes: usize,
}

impl SchedulerHandle {
    pub fn new(store: Arc<dyn PostStore>, max_media_bytes: usize) -> Self {
        Self {
            store,
            max_media_bytes,
        }
    }

    /// Validate and persist a new `scheduled` post.
    pub fn schedule_post(&self, req: ScheduleRequest) -> Result<PostId> {
        self.schedule_post_at(req, Utc::now())
    }

    /// [`schedule_post`](Self::schedule_post) with an explicit clock.
    pub fn schedule_post_at(&self, req: ScheduleRequest, now: DateTime<Utc>) -> Result<PostId> {
        let size = req.media.len();
        if size > self.max_media_bytes {
            return Err(SchedulerError::PayloadTooLarge {
                size,
                max: self.max_media_bytes,
            });
        }
        if req.media.is_empty() {
            return Err(SchedulerError::InvalidMedia("media payload is empty".into()));
        }
        if req.media.kind().is_none() {
            return Err(SchedulerError::InvalidMedia(format!(
                "unsupported media type {:?}, expected image/* or video/*",
                req.media.mime_type
            )));
        }
        if req.schedule_time <= now {
            return Err(SchedulerError::InvalidSchedule(format!(
                "schedule time {} is not in the future",
                req.schedule_time.to_rfc3339()
            )));
        }

        let id = req.id.unwrap_or_default();
        let record = PostRecord::new(id.clone(), req.media, req.schedule_time, req.credential, now);
        self.store.append(&record)?;

        info!(post_id = %id, schedule_time = %record.schedule_time, "post scheduled");
        Ok(id)
    }

    /// Credential-free view of every post, in creation order.
    pub fn list_posts(&self) -> Result<Vec<PostSnapshot>> {
        Ok(self.store.list()?)
    }

    /// The stored media of one post.
    pub fn media(&self, id: &PostId) -> Result<MediaBlob> {
        Ok(self.store.get(id)?.media)
    }
}
