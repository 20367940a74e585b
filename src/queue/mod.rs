//! The queue engine.
//!
//! A [`Queue`] owns the store, the active window, and one scheduler task.
//! Construction is synchronous and returns immediately; recovery runs in
//! the background and [`Queue::ready`] resolves once it has finished.
//! All mutable engine state sits behind a single async mutex that is never
//! held while the work function runs.

mod load;
mod scheduler;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventKind};
use crate::ids::IdAllocator;
use crate::model::{Failure, Status, Task, TaskId};
use crate::policy::StrikePolicy;
use crate::store::{Query, SqliteStore, Store};
use crate::telemetry::metrics::QueueMetrics;
use crate::window::ActiveWindow;

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// The user-supplied work function.
///
/// Returning `Err` counts as a strike against the task. Panics are caught
/// and recorded as failures of kind `panic`.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    async fn run(&self, task: Task) -> std::result::Result<Value, Failure>;
}

#[async_trait]
impl<F, Fut> Worker for F
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, Failure>> + Send + 'static,
{
    async fn run(&self, task: Task) -> std::result::Result<Value, Failure> {
        (self)(task).await
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Engine lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Loading,
    Ready,
    Failed(String),
    Closed,
}

impl Phase {
    fn check(&self) -> Result<()> {
        match self {
            Phase::Loading => Err(Error::NotReady),
            Phase::Ready => Ok(()),
            Phase::Failed(msg) => Err(Error::Other(format!("queue failed to load: {msg}"))),
            Phase::Closed => Err(Error::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self, Phase::Closed)
    }
}

/// Outcome of a delete, shared with callers that coalesced onto it.
type DeleteOutcome = Result<()>;

#[derive(Default)]
struct State {
    ids: IdAllocator,
    window: ActiveWindow,
    /// Id of the task currently running, if any.
    processing: Option<TaskId>,
    /// Id of the struck-out task halting the queue.
    blocked: Option<TaskId>,
    started: bool,
    /// In-flight deletes. Followers wait on the receiver for the outcome.
    deleting: HashMap<TaskId, watch::Receiver<Option<DeleteOutcome>>>,
}

pub(crate) struct Inner {
    config: QueueConfig,
    policy: StrikePolicy,
    store: Arc<dyn Store>,
    worker: Arc<dyn Worker>,
    events: EventBus,
    metrics: QueueMetrics,
    state: Mutex<State>,
    phase: watch::Sender<Phase>,
    wake: Arc<Notify>,
    scheduler: StdMutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn check_ready(&self) -> Result<()> {
        self.phase.borrow().check()
    }

    fn is_closed(&self) -> bool {
        self.phase.borrow().is_closed()
    }

    /// Drop the persisted block marker once the blocking task is gone.
    ///
    /// The task record already left `struckout`, and recovery ignores a
    /// marker whose task is not struck out, so a failed write only logs.
    async fn clear_blocker(&self, id: TaskId) {
        if let Err(e) = self.store.set_blocker(None).await {
            warn!(id = %id, error = %e, "failed to clear block marker");
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Handle to a durable, ordered work queue. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    /// Build a queue backed by SQLite at `config.path`.
    ///
    /// Must be called inside a tokio runtime. Returns as soon as the
    /// configuration is validated; recovery continues in the background.
    pub fn new<W: Worker>(config: QueueConfig, worker: W) -> Result<Self> {
        config.validate()?;
        let store = SqliteStore::open(&config.path)?;
        Self::with_store(config, store, worker)
    }

    /// Build a queue over any store. `config.path` is not used.
    pub fn with_store<S, W>(config: QueueConfig, store: S, worker: W) -> Result<Self>
    where
        S: Store + 'static,
        W: Worker,
    {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("a queue must be created inside a tokio runtime".into()))?;

        let (phase, _) = watch::channel(Phase::Loading);
        let inner = Arc::new(Inner {
            policy: StrikePolicy::new(config.strikes, config.block_on_fail),
            config,
            store: Arc::new(store),
            worker: Arc::new(worker),
            events: EventBus::new(),
            metrics: QueueMetrics::new(),
            state: Mutex::new(State::default()),
            phase,
            wake: Arc::new(Notify::new()),
            scheduler: StdMutex::new(None),
        });

        let handle = runtime.spawn(scheduler::run(
            Arc::downgrade(&inner),
            Arc::clone(&inner.wake),
            inner.phase.subscribe(),
        ));
        *inner
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        Ok(Self { inner })
    }

    /// Build a SQLite-backed queue and wait until it has loaded.
    pub async fn open<W: Worker>(config: QueueConfig, worker: W) -> Result<Self> {
        let queue = Self::new(config, worker)?;
        queue.ready().await?;
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Resolves once recovery has finished, or with the load error.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.phase.subscribe();
        let phase = rx
            .wait_for(|p| *p != Phase::Loading)
            .await
            .map_err(|_| Error::Closed)?
            .clone();
        phase.check()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Begin processing when built with `autostart = false`.
    pub async fn start(&self) -> Result<()> {
        self.ready().await?;
        self.inner.state.lock().await.started = true;
        info!("queue started");
        self.inner.wake.notify_one();
        Ok(())
    }

    // -- mutations ----------------------------------------------------------

    /// Enqueue a payload. Waits for readiness; returns the assigned id.
    pub async fn push(&self, input: Value) -> Result<TaskId> {
        self.ready().await?;
        let inner = &self.inner;

        let id = {
            let mut state = inner.state.lock().await;
            inner.check_ready()?;

            let id = state.ids.next(inner.store.as_ref()).await?;
            let task = Task::new(id, input);
            inner.store.put(&task).await?;
            state.window.push_back(task.clone());

            inner.events.emit(EventKind::CountChanged { count: id.0 + 1 });
            inner.events.emit(EventKind::TaskPushed { task });
            id
        };

        inner.metrics.pushed.add(1, &[]);
        info!(id = %id, "task pushed");
        inner.wake.notify_one();
        Ok(id)
    }

    /// Remove a task from the store and the window.
    ///
    /// Rejected while the task is running. A second delete of the same id
    /// issued while the first is in flight waits for, and reports, the
    /// first one's outcome.
    pub async fn delete(&self, id: TaskId) -> Result<()> {
        self.ready().await?;
        let inner = &self.inner;

        let done = {
            let mut state = inner.state.lock().await;
            if let Some(pending) = state.deleting.get(&id) {
                Err(pending.clone())
            } else if state.processing == Some(id) {
                return Err(Error::Processing(id));
            } else {
                let (tx, rx) = watch::channel(None);
                state.deleting.insert(id, rx);
                Ok(tx)
            }
        };

        let done = match done {
            Ok(tx) => tx,
            Err(mut pending) => {
                debug!(id = %id, "delete already in flight, waiting");
                let outcome = pending
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| Error::Other(format!("delete of task {id} was abandoned")))?
                    .as_ref()
                    .map(|done| done.as_ref().map(|_| ()).map_err(Error::replicate));
                return outcome.unwrap_or(Ok(()));
            }
        };

        let result = inner.store.delete(id).await;
        {
            let mut state = inner.state.lock().await;
            state.deleting.remove(&id);
            if result.is_ok() {
                state.window.remove(id);
                if state.blocked == Some(id) {
                    state.blocked = None;
                    inner.clear_blocker(id).await;
                    info!(id = %id, "blocking task deleted, queue resumes");
                }
                inner.events.emit(EventKind::TaskDeleted { id });
            }
        }
        let _ = done.send(Some(result.as_ref().map(|_| ()).map_err(Error::replicate)));

        if result.is_ok() {
            info!(id = %id, "task deleted");
        }
        inner.wake.notify_one();
        result
    }

    /// Mark a window task as skipped and drop it from the window.
    ///
    /// This is how an operator clears a struck-out task that is blocking
    /// the queue.
    pub async fn skip(&self, id: TaskId) -> Result<()> {
        self.ready().await?;
        let inner = &self.inner;

        {
            let mut state = inner.state.lock().await;
            let task = Self::guarded(&state, id)?;
            let skipped = task.skipped();
            inner.store.put(&skipped).await?;

            state.window.remove(id);
            if state.blocked == Some(id) {
                state.blocked = None;
                inner.clear_blocker(id).await;
            }
            inner.metrics.transitions.add(
                1,
                &[
                    opentelemetry::KeyValue::new("from", task.status.as_str()),
                    opentelemetry::KeyValue::new("to", Status::Skipped.as_str()),
                ],
            );
        }

        info!(id = %id, "task skipped");
        inner.wake.notify_one();
        Ok(())
    }

    /// Replace the input of a window task. Status is unchanged.
    pub async fn update(&self, id: TaskId, input: Value) -> Result<()> {
        self.ready().await?;
        let inner = &self.inner;

        let mut state = inner.state.lock().await;
        let updated = Self::guarded(&state, id)?.with_input(input);
        inner.store.put(&updated).await?;
        state.window.replace(updated);
        debug!(id = %id, "task input updated");
        Ok(())
    }

    /// Shared guard for `skip` and `update`: the task must be in the
    /// window, not running, and not being deleted.
    fn guarded(state: &State, id: TaskId) -> Result<Task> {
        if state.processing == Some(id) {
            return Err(Error::Processing(id));
        }
        if state.deleting.contains_key(&id) {
            return Err(Error::NotInWindow(id));
        }
        state.window.get(id).cloned().ok_or(Error::NotInWindow(id))
    }

    // -- store-backed accessors ---------------------------------------------

    /// Direct store lookup.
    pub async fn get_by_id(&self, id: TaskId) -> Result<Task> {
        self.ready().await?;
        self.inner.store.get(id).await
    }

    pub async fn pending(&self) -> Result<Vec<Task>> {
        self.query(Query::Status(Status::Pending)).await
    }

    pub async fn running(&self) -> Result<Vec<Task>> {
        self.query(Query::Status(Status::Running)).await
    }

    pub async fn succeeded(&self) -> Result<Vec<Task>> {
        self.query(Query::Status(Status::Success)).await
    }

    /// Tasks in `fail`; with `below`, only those with fewer strikes.
    pub async fn failed(&self, below: Option<u32>) -> Result<Vec<Task>> {
        self.query(Query::Failed { below }).await
    }

    pub async fn struck_out(&self) -> Result<Vec<Task>> {
        self.query(Query::Status(Status::Struckout)).await
    }

    pub async fn skipped(&self) -> Result<Vec<Task>> {
        self.query(Query::Status(Status::Skipped)).await
    }

    async fn query(&self, query: Query) -> Result<Vec<Task>> {
        self.ready().await?;
        self.inner.store.query(&query).await
    }

    // -- engine-state accessors ---------------------------------------------

    /// Number of ids allocated so far. `NotReady` before load.
    pub async fn count(&self) -> Result<u64> {
        self.inner.state.lock().await.ids.count()
    }

    /// Number of tasks in the active window.
    pub async fn len(&self) -> Result<usize> {
        self.inner.check_ready()?;
        Ok(self.inner.state.lock().await.window.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Snapshot of the active window, head first.
    pub async fn window(&self) -> Result<Vec<Task>> {
        self.inner.check_ready()?;
        Ok(self.inner.state.lock().await.window.snapshot())
    }

    pub async fn is_processing(&self, id: TaskId) -> bool {
        self.inner.state.lock().await.processing == Some(id)
    }

    /// The struck-out task halting the queue, if any.
    pub async fn blocked(&self) -> Option<TaskId> {
        self.inner.state.lock().await.blocked
    }

    // -- shutdown -------------------------------------------------------------

    /// Stop the scheduler and close the store.
    ///
    /// An attempt already in progress runs to completion and is persisted
    /// first. Further calls on any handle fail with `Error::Closed`.
    pub async fn close(&self) -> Result<()> {
        let was = self.inner.phase.send_replace(Phase::Closed);
        if was.is_closed() {
            return Ok(());
        }
        self.inner.wake.notify_one();

        let handle = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.store.close().await?;
        info!("queue closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> QueueConfig {
        QueueConfig::new("unused.db", Duration::ZERO)
    }

    async fn echo(task: Task) -> std::result::Result<Value, Failure> {
        Ok(task.input)
    }

    #[test]
    fn building_outside_a_runtime_fails() {
        let result = std::thread::spawn(|| {
            Queue::with_store(config(), MemoryStore::new(), echo).map(|_| ())
        })
        .join()
        .unwrap();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let bad = config().strikes(crate::policy::Strikes::Limit(0));
        assert!(matches!(
            Queue::with_store(bad, MemoryStore::new(), echo),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn guards_reject_unknown_ids() {
        let queue = Queue::with_store(config().autostart(false), MemoryStore::new(), echo).unwrap();
        queue.ready().await.unwrap();

        assert!(matches!(
            queue.skip(TaskId(5)).await,
            Err(Error::NotInWindow(TaskId(5)))
        ));
        assert!(matches!(
            queue.update(TaskId(5), json!(1)).await,
            Err(Error::NotInWindow(TaskId(5)))
        ));
        assert!(queue.delete(TaskId(5)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn closed_queue_rejects_work() {
        let queue = Queue::with_store(config(), MemoryStore::new(), echo).unwrap();
        queue.ready().await.unwrap();
        queue.close().await.unwrap();

        assert!(matches!(queue.push(json!(1)).await, Err(Error::Closed)));
        assert!(matches!(queue.len().await, Err(Error::Closed)));
        queue.close().await.unwrap();
    }
}
