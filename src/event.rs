//! Structured events emitted by the queue on every lifecycle change.
//!
//! Consumers subscribe to the event stream to build dashboards, alerting,
//! or audit logs. Delivery is best effort: a slow subscriber that falls
//! behind the broadcast buffer sees a `Lagged` error and a gap in `seq`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Failure, Task, TaskId};

/// Buffer size of the broadcast channel.
pub const EVENT_CAPACITY: usize = 1024;

/// A structured event emitted by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Recovery finished; the queue accepts work.
    Ready,
    /// The id counter moved.
    CountChanged { count: u64 },
    TaskPushed { task: Task },
    TaskDeleted { id: TaskId },
    TaskStarted { task: Task },
    TaskSucceeded { task: Task },
    /// An attempt failed. `task` is the post-attempt snapshot.
    TaskFailed { task: Task, error: Failure },
    TaskStruckOut { task: Task },
}

/// Sending half of the event stream. Stamps `seq` and `timestamp`.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, kind: EventKind) -> Event {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.tx.send(event.clone());
        event
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
