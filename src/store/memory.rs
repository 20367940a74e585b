//! In-memory [`Store`] for tests.
//!
//! Clones share the same contents, so a test can drop a queue and open a
//! new one over the same store to simulate a restart.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Query, Store};
use crate::error::{Error, Result};
use crate::model::{Task, TaskId};

#[derive(Default)]
struct Contents {
    tasks: BTreeMap<TaskId, Task>,
    counter: Option<u64>,
    blocker: Option<TaskId>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    contents: Arc<Mutex<Contents>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched back off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Seed a record directly, bypassing any queue.
    pub async fn insert(&self, task: Task) {
        self.contents.lock().await.tasks.insert(task.id, task);
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Other("memory store: write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        self.contents
            .lock()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn put(&self, task: &Task) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        self.check_writable()?;
        match self.contents.lock().await.tasks.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("task {id}"))),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Task>> {
        Ok(self
            .contents
            .lock()
            .await
            .tasks
            .values()
            .filter(|task| query.matches(task))
            .cloned()
            .collect())
    }

    async fn counter(&self) -> Result<u64> {
        self.contents
            .lock()
            .await
            .counter
            .ok_or_else(|| Error::NotFound("next_id".to_string()))
    }

    async fn set_counter(&self, value: u64) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().await.counter = Some(value);
        Ok(())
    }

    async fn blocker(&self) -> Result<Option<TaskId>> {
        Ok(self.contents.lock().await.blocker)
    }

    async fn set_blocker(&self, id: Option<TaskId>) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().await.blocker = id;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
