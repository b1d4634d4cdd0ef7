//! `postbot-scheduler`: due-item scanner and per-post processing pipeline.
//!
//! # Overview
//!
//! [`SchedulerHandle::schedule_post`] validates a request and appends a
//! `scheduled` post to the store. The [`SchedulerEngine`] wakes on a fixed
//! interval, lists the store, and drives every due post through the
//! [`Pipeline`]:
//!
//! | Step | Store write                         | Collaborator        |
//! |------|-------------------------------------|---------------------|
//! | 1    | `scheduled → processing` (claim)    |                     |
//! | 2    | on failure: `failed`, no caption    | [`CaptionGenerator`] |
//! | 3    | `posted` / `failed`, caption kept   | [`Publisher`]        |
//!
//! Each write is committed before the next step starts, so a crash leaves
//! the last completed step visible.

pub mod collab;
pub mod engine;
pub mod error;
pub mod handle;
pub mod pipeline;

pub use collab::{CaptionGenerator, GenerationError, PublishError, Publisher};
pub use engine::{SchedulerEngine, TickOutcome, TickReport};
pub use error::{PipelineError, Result, SchedulerError};
pub use handle::{ScheduleRequest, SchedulerHandle};
pub use pipeline::{FailureStage, Pipeline, PipelineOutcome};
