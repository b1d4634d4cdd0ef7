//! `postbot-store`: durable post storage with cross-process change feed.
//!
//! # Overview
//!
//! Posts live in a SQLite `posts` table. Every committed write also appends a
//! row to `post_changes`; the [`sync::ChangeWatcher`] tails that log so any
//! process sharing the database file learns about writes made by any other.
//!
//! | Table          | Purpose                                         |
//! |----------------|-------------------------------------------------|
//! | `posts`        | One row per post, creation order kept in `seq`  |
//! | `post_changes` | Append-only log of `(seq, post_id)` per write   |

pub mod db;
pub mod error;
pub mod store;
pub mod sync;

pub use error::{Result, StoreError};
pub use store::{ChangeEntry, PostStore, SqlitePostStore};
pub use sync::{ChangeWatcher, StoreChange, ViewSync};
