//! Scheduling requests raised elsewhere in the process.
//!
//! Request handlers that create or remove recurring work send a
//! [`SchedulerEvent`] instead of calling the scheduler directly, so the HTTP
//! response does not wait on the task store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use modapto_types::ScheduledTask;

use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Register(ScheduledTask),
    Delete(String),
}

/// Apply events to the scheduler until every sender is dropped.
pub fn spawn_event_listener(
    scheduler: Arc<Scheduler>,
    mut rx: mpsc::UnboundedReceiver<SchedulerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SchedulerEvent::Register(task) => {
                    let module_id = task.module_id.clone();
                    if let Err(e) = scheduler.register_task(task).await {
                        warn!(module_id = %module_id, "Failed to register scheduled task: {e}");
                    }
                }
                SchedulerEvent::Delete(id) => {
                    if let Err(e) = scheduler.delete_task(&id).await {
                        warn!(task_id = %id, "Failed to delete scheduled task: {e}");
                    }
                }
            }
        }
        info!("Scheduler event channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DEFAULT_RETRY_DELAY;
    use crate::test_support::{HandlerMode, MemoryTaskStore, RecordingHandlers, TokioClock, task};
    use chrono::{TimeZone, Utc};
    use modapto_types::FrequencyUnit;

    #[tokio::test(start_paused = true)]
    async fn test_listener_registers_and_deletes() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let store = Arc::new(MemoryTaskStore::default());
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(RecordingHandlers::new(HandlerMode::Succeed)),
            Arc::new(TokioClock::starting_at(now)),
            DEFAULT_RETRY_DELAY,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = spawn_event_listener(scheduler.clone(), rx);

        tx.send(SchedulerEvent::Register(task("press", FrequencyUnit::Hours, 1, now)))
            .unwrap();
        // Unknown ids are logged and skipped.
        tx.send(SchedulerEvent::Delete("missing".into())).unwrap();
        tx.send(SchedulerEvent::Delete("task-0".into())).unwrap();
        drop(tx);
        listener.await.unwrap();

        assert_eq!(store.len(), 0);
        assert_eq!(scheduler.armed_count(), 0);
        assert_eq!(store.saves.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
