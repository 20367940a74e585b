//! Durable store adapter.
//!
//! The queue talks to persistence through [`Store`]: point lookups, writes,
//! deletes, predicate queries over the `status` and `fail_count` indexes,
//! and a counter kept under a reserved key. Every write is durable before
//! the call returns.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Status, Task, TaskId};

/// Predicate over persisted tasks. Results are always in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every task with exactly this status.
    Status(Status),
    /// Every task whose status is one of these.
    StatusIn(Vec<Status>),
    /// Tasks in `fail`, optionally only those with `fail_count < below`.
    Failed { below: Option<u32> },
    /// Everything.
    All,
}

impl Query {
    /// Does `task` satisfy this predicate?
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            Query::Status(status) => task.status == *status,
            Query::StatusIn(statuses) => statuses.contains(&task.status),
            Query::Failed { below } => {
                task.status == Status::Fail && below.is_none_or(|limit| task.fail_count < limit)
            }
            Query::All => true,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables and indexes. Idempotent.
    async fn init(&self) -> Result<()>;

    /// Point lookup. `Error::NotFound` when absent.
    async fn get(&self, id: TaskId) -> Result<Task>;

    /// Insert or replace.
    async fn put(&self, task: &Task) -> Result<()>;

    /// Remove. `Error::NotFound` when absent.
    async fn delete(&self, id: TaskId) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<Task>>;

    /// The persisted id counter. `Error::NotFound` on first run.
    async fn counter(&self) -> Result<u64>;

    async fn set_counter(&self, value: u64) -> Result<()>;

    /// The task recorded as halting the queue, if any.
    async fn blocker(&self) -> Result<Option<TaskId>>;

    async fn set_blocker(&self, id: Option<TaskId>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: u64, status: Status, fail_count: u32) -> Task {
        let mut task = Task::new(TaskId(id), json!(null));
        task.status = status;
        task.fail_count = fail_count;
        task
    }

    #[test]
    fn failed_query_respects_threshold() {
        let q = Query::Failed { below: Some(2) };
        assert!(q.matches(&task(0, Status::Fail, 1)));
        assert!(!q.matches(&task(1, Status::Fail, 2)));
        assert!(!q.matches(&task(2, Status::Struckout, 1)));
        assert!(Query::Failed { below: None }.matches(&task(3, Status::Fail, 99)));
    }

    #[test]
    fn status_in_matches_any_listed_status() {
        let q = Query::StatusIn(vec![Status::Pending, Status::Running]);
        assert!(q.matches(&task(0, Status::Running, 0)));
        assert!(!q.matches(&task(1, Status::Success, 0)));
    }
}
