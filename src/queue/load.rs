//! Recovery: rebuild the active window from the store on startup.

use tracing::{debug, info, warn};

use super::{Inner, Phase};
use crate::error::Result;
use crate::event::EventKind;
use crate::ids::IdAllocator;
use crate::model::{Status, Task};
use crate::store::Query;
use crate::window::ActiveWindow;

impl Inner {
    /// Run recovery and publish the outcome through the phase channel.
    pub(super) async fn load_and_publish(&self) -> bool {
        match self.load().await {
            Ok(()) => {
                let became_ready = self.phase.send_if_modified(|phase| {
                    if *phase == Phase::Loading {
                        *phase = Phase::Ready;
                        true
                    } else {
                        false
                    }
                });
                if became_ready {
                    self.events.emit(EventKind::Ready);
                }
                became_ready
            }
            Err(e) => {
                tracing::error!(error = %e, "queue failed to load");
                self.phase.send_if_modified(|phase| {
                    if *phase == Phase::Loading {
                        *phase = Phase::Failed(e.to_string());
                        true
                    } else {
                        false
                    }
                });
                false
            }
        }
    }

    /// Load the id counter and reconcile interrupted work.
    ///
    /// Any task persisted as `running` did not finish before the last
    /// shutdown; it goes back to `pending` and the change is persisted
    /// before the window is built. With block-on-fail, the task that was
    /// blocking is put back in the window and keeps the queue halted.
    async fn load(&self) -> Result<()> {
        self.store.init().await?;

        let mut ids = IdAllocator::new();
        let count = ids.load(self.store.as_ref()).await?;

        let active_statuses = Status::ALL.into_iter().filter(|s| s.is_active()).collect();
        let active = self.store.query(&Query::StatusIn(active_statuses)).await?;

        let mut tasks = Vec::with_capacity(active.len());
        let mut recovered = 0usize;
        for task in active {
            if task.status == Status::Running {
                let task = task.recovered();
                self.store.put(&task).await?;
                warn!(id = %task.id, "interrupted task reset to pending");
                recovered += 1;
                tasks.push(task);
            } else {
                tasks.push(task);
            }
        }

        let blocker = self.restore_blocker().await?;
        let blocked = blocker.as_ref().map(|task| task.id);
        tasks.extend(blocker);

        let window = ActiveWindow::from_tasks(tasks);
        let window_len = window.len();

        {
            let mut state = self.state.lock().await;
            state.ids = ids;
            state.window = window;
            state.blocked = blocked;
            state.started = self.config.autostart;
        }

        info!(
            count,
            window = window_len,
            recovered,
            blocked = blocked.is_some(),
            "queue loaded"
        );
        Ok(())
    }

    /// The task recorded as blocking when the last run stopped.
    ///
    /// Only a marker whose task is still struck out counts. Struck-out
    /// tasks evicted without blocking stay out. A stale marker, or any
    /// marker when block-on-fail is off, is cleared.
    async fn restore_blocker(&self) -> Result<Option<Task>> {
        let Some(id) = self.store.blocker().await? else {
            return Ok(None);
        };

        let task = match self.store.get(id).await {
            Ok(task) => Some(task),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        match task {
            Some(task) if self.config.block_on_fail && task.status == Status::Struckout => {
                warn!(id = %id, "struck-out task still blocking the queue");
                Ok(Some(task))
            }
            _ => {
                debug!(id = %id, "dropping block marker");
                self.store.set_blocker(None).await?;
                Ok(None)
            }
        }
    }
}
