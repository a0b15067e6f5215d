//! Recurring task scheduler: one timer per task, rescheduled after every firing.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use modapto_storage::TaskStore;
use modapto_types::{Page, ScheduledTask, to_seconds};

use crate::clock::Clock;
use crate::handlers::{Dispatched, TaskHandlers, dispatch};
use crate::{Result, SchedulerError};

/// Delay before a failed firing is retried.
pub const DEFAULT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5 * 60);

const MAX_PAGE_SIZE: u32 = 100;

struct TimerSlot {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Timers {
    slots: HashMap<String, TimerSlot>,
    /// Generations that were live when the scheduler shut down.
    retired: HashMap<String, u64>,
    shut_down: bool,
}

/// Outcome of trying to claim the timer slot for a task.
enum Claim {
    Armed(CancellationToken, u64),
    /// Another registration replaced the slot.
    Superseded,
    /// The task was deleted.
    Removed,
    ShutDown,
}

/// Whether a finishing firing may still write its task back.
enum Ownership {
    Owned,
    /// Live at shutdown: persist, but do not re-arm.
    Retired,
    /// Deleted or re-registered meanwhile.
    Lost,
}

/// Manages recurring task timers.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    handlers: Arc<dyn TaskHandlers>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    timers: Mutex<Timers>,
    generation: AtomicU64,
    /// Held across each store write together with the timer change that
    /// goes with it, so register, delete and reschedule never interleave.
    writes: tokio::sync::Mutex<()>,
}

impl Scheduler {
    /// Create a scheduler. Nothing is armed until tasks are registered or
    /// [`initialize_from_store`](Self::initialize_from_store) runs.
    pub fn new(
        store: Arc<dyn TaskStore>,
        handlers: Arc<dyn TaskHandlers>,
        clock: Arc<dyn Clock>,
        retry_delay: std::time::Duration,
    ) -> Arc<Self> {
        let retry_delay = Duration::from_std(retry_delay).unwrap_or_else(|_| {
            Duration::from_std(DEFAULT_RETRY_DELAY).unwrap_or(Duration::minutes(5))
        });
        Arc::new(Self {
            store,
            handlers,
            clock,
            retry_delay,
            timers: Mutex::new(Timers::default()),
            generation: AtomicU64::new(0),
            writes: tokio::sync::Mutex::new(()),
        })
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a new task and arm its timer.
    ///
    /// `created_at` and the first execution time are computed from now. If the
    /// task already has an id its previous timer is replaced.
    pub async fn register_task(self: &Arc<Self>, task: ScheduledTask) -> Result<ScheduledTask> {
        let _writes = self.writes.lock().await;
        if self.timers().shut_down {
            return Err(SchedulerError::ShutDown);
        }

        let now = self.clock.now();
        let mut task = task;
        if task.id.is_none() {
            task.created_at = now;
        }
        task.next_execution_time = task.frequency.next_after(now);

        let saved = self.store.save(&task).await?;
        info!(
            task_id = ?saved.id,
            task_type = saved.tag(),
            frequency = %saved.frequency,
            next = %saved.next_execution_time,
            "Registered scheduled task"
        );
        self.arm(saved.clone());
        Ok(saved)
    }

    /// Cancel the task's timer and delete it from the store.
    ///
    /// A firing already in progress is allowed to finish but is not rescheduled.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let _writes = self.writes.lock().await;
        let task = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        self.cancel(id);
        self.store.delete(&task).await?;
        info!(task_id = id, "Deleted scheduled task");
        Ok(())
    }

    /// List stored tasks of one type, `page` counted from zero.
    pub async fn list_tasks_by_type(
        &self,
        task_type: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<ScheduledTask>> {
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page) * u64::from(size);
        let items = self.store.find_by_type(task_type, offset, size).await?;
        let total = self.store.count_by_type(task_type).await?;
        Ok(Page {
            items,
            page,
            size,
            total,
        })
    }

    /// Load every stored task and arm it. Overdue tasks run once now and are
    /// then rescheduled from the current time; missed firings are not replayed.
    ///
    /// Returns the number of tasks recovered.
    pub async fn initialize_from_store(self: &Arc<Self>) -> Result<usize> {
        let tasks = self.store.find_all().await?;
        let now = self.clock.now();
        let total = tasks.len();

        let (overdue, upcoming): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|t| t.next_execution_time <= now);

        for task in upcoming {
            self.arm(task);
        }

        let mut catch_ups = Vec::with_capacity(overdue.len());
        for task in overdue {
            let Some(id) = task.id.clone() else {
                warn!("Skipping stored task without id");
                continue;
            };
            info!(
                task_id = %id,
                missed = %task.next_execution_time,
                "Task overdue after restart, running catch-up"
            );
            if let Claim::Armed(_, generation) = self.claim(&id, None) {
                catch_ups.push(self.fire(task, generation));
            }
        }
        let caught_up = catch_ups.len();
        join_all(catch_ups).await;

        info!(
            "Recovered {total} scheduled tasks ({caught_up} caught up, {} timers armed)",
            self.armed_count()
        );
        Ok(total)
    }

    /// Cancel every timer. In-flight firings finish and persist their next
    /// execution time but are not re-armed; stored tasks are left untouched.
    pub fn shutdown(&self) {
        let mut timers = self.timers();
        timers.shut_down = true;
        let count = timers.slots.len();
        let drained: Vec<_> = timers.slots.drain().collect();
        for (id, slot) in drained {
            slot.token.cancel();
            timers.retired.insert(id, slot.generation);
        }
        info!("Scheduler shut down, cancelled {count} timers");
    }

    /// Number of tasks with a live timer.
    pub fn armed_count(&self) -> usize {
        self.timers().slots.len()
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.timers().slots.contains_key(id)
    }

    // ─── Timers ───────────────────────────────────

    /// Take the timer slot for `id`, cancelling whatever held it.
    ///
    /// With `expected` set, the slot is only taken if that generation still
    /// owns it, so a firing never re-arms a task that was deleted or
    /// re-registered meanwhile.
    fn claim(&self, id: &str, expected: Option<u64>) -> Claim {
        let mut timers = self.timers();
        if timers.shut_down {
            return Claim::ShutDown;
        }
        if let Some(expected) = expected {
            match timers.slots.get(id) {
                None => return Claim::Removed,
                Some(slot) if slot.generation != expected => return Claim::Superseded,
                Some(_) => {}
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = timers.slots.insert(
            id.to_string(),
            TimerSlot {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        Claim::Armed(token, generation)
    }

    fn cancel(&self, id: &str) {
        let mut timers = self.timers();
        timers.retired.remove(id);
        if let Some(slot) = timers.slots.remove(id) {
            slot.token.cancel();
            debug!(task_id = id, "Cancelled timer");
        }
    }

    fn ownership(&self, id: &str, generation: u64) -> Ownership {
        let timers = self.timers();
        if timers
            .slots
            .get(id)
            .is_some_and(|slot| slot.generation == generation)
        {
            Ownership::Owned
        } else if timers.retired.get(id) == Some(&generation) {
            Ownership::Retired
        } else {
            Ownership::Lost
        }
    }

    fn arm(self: &Arc<Self>, task: ScheduledTask) {
        let Some(id) = task.id.clone() else {
            warn!("Cannot arm a task that has not been saved");
            return;
        };
        match self.claim(&id, None) {
            Claim::Armed(token, generation) => self.spawn_timer(task, token, generation),
            _ => debug!(task_id = %id, "Scheduler shut down, not arming"),
        }
    }

    fn spawn_timer(self: &Arc<Self>, task: ScheduledTask, token: CancellationToken, generation: u64) {
        let delay = (task.next_execution_time - self.clock.now())
            .to_std()
            .unwrap_or_default();
        debug!(task_id = ?task.id, delay_secs = delay.as_secs(), "Armed timer");

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            scheduler.fire(task, generation).await;
        });
    }

    // ─── Firing ───────────────────────────────────

    /// Run the task once, then persist and re-arm it.
    async fn fire(self: &Arc<Self>, task: ScheduledTask, generation: u64) {
        let now = self.clock.now();
        let task = self.execute(task, now).await;
        self.reschedule(task, generation).await;
    }

    /// Run the handler and compute the next execution time. Never fails:
    /// any error or panic turns into a retry.
    async fn execute(&self, mut task: ScheduledTask, now: DateTime<Utc>) -> ScheduledTask {
        let id = task.id.clone().unwrap_or_default();
        debug!(task_id = %id, task_type = task.tag(), "Firing scheduled task");

        let outcome = AssertUnwindSafe(dispatch(self.handlers.as_ref(), &task))
            .catch_unwind()
            .await;

        task.next_execution_time = match outcome {
            Ok(Ok(Dispatched::Ran)) => {
                info!(task_id = %id, "Scheduled task completed");
                task.frequency.next_after(now)
            }
            Ok(Ok(Dispatched::UnknownType)) => {
                warn!(task_id = %id, task_type = task.tag(), "No handler for task type, skipping");
                task.frequency.next_after(now)
            }
            Ok(Err(e)) => {
                error!(task_id = %id, "Scheduled task failed, retrying later: {e:#}");
                self.retry_after(now)
            }
            Err(_) => {
                error!(task_id = %id, "Scheduled task handler panicked, retrying later");
                self.retry_after(now)
            }
        };
        task
    }

    fn retry_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let retry = now
            .checked_add_signed(self.retry_delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        to_seconds(retry)
    }

    async fn reschedule(self: &Arc<Self>, task: ScheduledTask, generation: u64) {
        let Some(id) = task.id.clone() else {
            return;
        };

        let _writes = self.writes.lock().await;
        let rearm = match self.ownership(&id, generation) {
            Ownership::Owned => true,
            Ownership::Retired => false,
            Ownership::Lost => {
                debug!(task_id = %id, "Task deleted or replaced while firing, not rescheduling");
                return;
            }
        };

        // The run already happened; a failed write only loses bookkeeping, and
        // the task may run again early after a restart.
        if let Err(e) = self.store.save(&task).await {
            error!(
                task_id = %id,
                next = %task.next_execution_time,
                "Failed to persist next execution time: {e}"
            );
        }

        if !rearm {
            debug!(task_id = %id, "Scheduler shut down while firing, next execution stored only");
            return;
        }

        match self.claim(&id, Some(generation)) {
            Claim::Armed(token, generation) => {
                debug!(task_id = %id, next = %task.next_execution_time, "Rescheduled task");
                self.spawn_timer(task, token, generation);
            }
            Claim::ShutDown => {
                debug!(task_id = %id, "Scheduler shut down while firing, not re-arming");
            }
            // Register and delete wait for `writes`, so the slot cannot change hands here.
            Claim::Superseded | Claim::Removed => {}
        }
    }
}
