//! The scheduler: one routine per queue that works the window head.
//!
//! It sleeps on the wake signal, then runs attempts back to back (with the
//! throttle in between) until there is nothing it is allowed to do. It
//! only holds a weak reference while idle so dropping every `Queue`
//! handle lets it exit.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::{Notify, watch};
use tracing::{Instrument, debug, error, info, warn};

use super::{Inner, Phase};
use crate::event::EventKind;
use crate::model::{Failure, Status, Task};
use crate::policy::Disposition;
use crate::telemetry::task::{record_state_transition, start_attempt_span};

/// First pause before retrying after a storage error.
const RETRY_MIN: Duration = Duration::from_millis(100);
/// Ceiling for the doubling retry pause.
const RETRY_MAX: Duration = Duration::from_secs(5);

/// Result of one scheduler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// An attempt ran and was persisted.
    Ran,
    /// Nothing the scheduler is allowed to run.
    Idle,
    /// A store write failed; the head was rolled back.
    Stalled,
}

pub(super) async fn run(queue: Weak<Inner>, wake: Arc<Notify>, mut phase: watch::Receiver<Phase>) {
    let loaded = match queue.upgrade() {
        Some(inner) => inner.load_and_publish().await,
        None => false,
    };
    if !loaded {
        return;
    }

    let mut backoff = RETRY_MIN;
    loop {
        let retry = {
            let Some(inner) = queue.upgrade() else { break };
            if inner.is_closed() {
                break;
            }
            match inner.drain(&mut phase).await {
                Step::Stalled => {
                    let pause = backoff.max(inner.config.throttle());
                    backoff = (backoff * 2).min(RETRY_MAX);
                    warn!(retry_in_ms = pause.as_millis() as u64, "store write failed, retrying");
                    Some(pause)
                }
                _ => {
                    backoff = RETRY_MIN;
                    None
                }
            }
        };

        // Nothing but a wake moves an idle queue; a stalled one also
        // retries on its own once the pause runs out.
        let retry_after = async {
            match retry {
                Some(pause) => tokio::time::sleep(pause).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = wake.notified() => {}
            _ = retry_after => {}
            // Also fires with Err once every handle is gone.
            _ = phase.wait_for(Phase::is_closed) => break,
        }
    }

    debug!("scheduler stopped");
}

impl Inner {
    /// Run attempts until the queue has nothing runnable, pausing for the
    /// throttle after each one. Returns the step that stopped it.
    async fn drain(&self, phase: &mut watch::Receiver<Phase>) -> Step {
        loop {
            let step = self.step().await;
            if step != Step::Ran {
                return step;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.throttle()) => {}
                _ = phase.wait_for(Phase::is_closed) => return Step::Idle,
            }
        }
    }

    /// One attempt at the window head.
    async fn step(&self) -> Step {
        let (previous, running) = {
            let mut state = self.state.lock().await;
            if self.is_closed() {
                return Step::Idle;
            }
            if !state.started {
                debug!("scheduler idle: not started");
                return Step::Idle;
            }
            if state.processing.is_some() {
                return Step::Idle;
            }
            if let Some(id) = state.blocked {
                debug!(blocked = %id, "scheduler idle: queue blocked");
                return Step::Idle;
            }
            let Some(head) = state.window.head() else {
                return Step::Idle;
            };
            if state.deleting.contains_key(&head.id) {
                debug!(id = %head.id, "scheduler idle: head is being deleted");
                return Step::Idle;
            }

            let previous = head.clone();
            let running = previous.started();
            state.processing = Some(running.id);
            (previous, running)
        };

        let span = start_attempt_span(&running);

        if let Err(e) = self.store.put(&running).await {
            error!(id = %running.id, error = %e, "failed to persist running task");
            self.abandon(previous).await;
            return Step::Stalled;
        }
        record_state_transition(&span, &self.metrics, previous.status, Status::Running);

        {
            let mut state = self.state.lock().await;
            state.window.replace(running.clone());
            self.events.emit(EventKind::TaskStarted {
                task: running.clone(),
            });
        }

        let started_at = Instant::now();
        let outcome = self.attempt(running.clone()).instrument(span.clone()).await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

        let settled = self.policy.settle(&running, outcome);
        self.metrics.attempt_duration.record(
            elapsed_ms,
            &[KeyValue::new("outcome", settled.status.as_str())],
        );

        // The marker goes first: recovery ignores one whose task is not
        // struck out, but a struck-out record without it would not block.
        let disposition = self.policy.disposition(&settled);
        if disposition == Disposition::Block {
            if let Err(e) = self.store.set_blocker(Some(settled.id)).await {
                error!(id = %settled.id, error = %e, "failed to persist block marker");
                self.abandon(previous).await;
                return Step::Stalled;
            }
        }

        if let Err(e) = self.store.put(&settled).await {
            error!(id = %settled.id, error = %e, "failed to persist attempt outcome");
            self.abandon(previous).await;
            return Step::Stalled;
        }
        record_state_transition(&span, &self.metrics, Status::Running, settled.status);

        {
            let mut state = self.state.lock().await;
            match disposition {
                Disposition::Advance | Disposition::Evict => {
                    state.window.remove(settled.id);
                }
                Disposition::Retry => {
                    state.window.replace(settled.clone());
                }
                Disposition::Block => {
                    state.window.replace(settled.clone());
                    state.blocked = Some(settled.id);
                }
            }
            state.processing = None;
            self.announce(&settled, disposition);
        }

        Step::Ran
    }

    /// Run the work function in its own task so a panic becomes a failure.
    async fn attempt(&self, task: Task) -> Result<serde_json::Value, Failure> {
        let worker = Arc::clone(&self.worker);
        let handle = tokio::spawn(async move { worker.run(task).await }.in_current_span());
        match handle.await {
            Ok(outcome) => outcome,
            Err(join) if join.is_panic() => {
                Err(Failure::panic(panic_message(join.into_panic())))
            }
            Err(_) => Err(Failure::new("work function was cancelled").with_kind("cancelled")),
        }
    }

    /// Put the pre-attempt snapshot back and free the slot after a
    /// storage error. The next wake retries from there.
    async fn abandon(&self, previous: Task) {
        let mut state = self.state.lock().await;
        state.window.replace(previous);
        state.processing = None;
    }

    /// Emit events and logs for a settled attempt. Called under the state lock.
    fn announce(&self, settled: &Task, disposition: Disposition) {
        match settled.status {
            Status::Success => {
                info!(id = %settled.id, "task succeeded");
                self.events.emit(EventKind::TaskSucceeded {
                    task: settled.clone(),
                });
            }
            _ => {
                if let Some(error) = settled.last_error() {
                    warn!(
                        id = %settled.id,
                        fail_count = settled.fail_count,
                        error = %error,
                        "task attempt failed"
                    );
                    self.events.emit(EventKind::TaskFailed {
                        task: settled.clone(),
                        error: error.clone(),
                    });
                }
                if settled.status == Status::Struckout {
                    let blocking = disposition == Disposition::Block;
                    warn!(id = %settled.id, blocking, "task struck out");
                    self.metrics
                        .struck_out
                        .add(1, &[KeyValue::new("blocking", blocking.to_string())]);
                    self.events.emit(EventKind::TaskStruckOut {
                        task: settled.clone(),
                    });
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "work function panicked".to_string()
    }
}
