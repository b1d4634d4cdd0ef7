//! `postbot-core`: shared types, errors and configuration for the postbot
//! workspace.
//!
//! The [`types::PostRecord`] is the unit of work moved through the scheduler;
//! [`types::PostSnapshot`] is its credential-free projection handed to
//! observers.

pub mod config;
pub mod error;
pub mod types;

pub use config::PostbotConfig;
pub use error::{CoreError, Result, TransitionError};
pub use types::{
    Credential, MediaBlob, MediaInfo, MediaKind, PostId, PostRecord, PostSnapshot, PostStatus,
};
