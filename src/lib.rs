//! # strikeq
//!
//! Durable, strictly ordered work queue backed by SQLite.
//!
//! Tasks are processed one at a time by a user-supplied work function.
//! Failed attempts count as strikes; a task that reaches the strike limit
//! is struck out and, with block-on-fail, halts the queue until an
//! operator skips or deletes it. Every transition is persisted, and a
//! restarted queue picks up exactly where the previous process stopped.

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod policy;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod window;

pub use config::QueueConfig;
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use model::{Failure, Status, Task, TaskId};
pub use policy::Strikes;
pub use queue::{Queue, Worker};
