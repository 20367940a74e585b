//! Persisted monotonic id counter.

use crate::error::{Error, Result};
use crate::model::TaskId;
use crate::store::Store;

/// Hands out strictly increasing task ids.
///
/// The counter is unusable until [`load`](Self::load) has read (or
/// initialized) the persisted value. Each allocation persists `count + 1`
/// before the id is returned, so an id is never handed out twice across
/// restarts. Callers serialize allocation; the allocator itself is not
/// shared.
#[derive(Debug, Default)]
pub struct IdAllocator {
    count: Option<u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the persisted counter, initializing it to zero on first run.
    pub async fn load(&mut self, store: &dyn Store) -> Result<u64> {
        let count = match store.counter().await {
            Ok(count) => count,
            Err(e) if e.is_not_found() => {
                store.set_counter(0).await?;
                0
            }
            Err(e) => return Err(e),
        };
        self.count = Some(count);
        Ok(count)
    }

    /// Number of ids allocated so far.
    pub fn count(&self) -> Result<u64> {
        self.count.ok_or(Error::NotReady)
    }

    /// Allocate the next id.
    pub async fn next(&mut self, store: &dyn Store) -> Result<TaskId> {
        let count = self.count()?;
        store.set_counter(count + 1).await?;
        self.count = Some(count + 1);
        Ok(TaskId(count))
    }
}
