//! Task-type handler dispatch.

use async_trait::async_trait;

use modapto_types::{ScheduledTask, TaskPayload, ThresholdMaintenanceInput};

/// One handler per task type. Adding a task type adds a method here, so
/// every implementation must decide how to run it.
#[async_trait]
pub trait TaskHandlers: Send + Sync {
    async fn threshold_maintenance(
        &self,
        task: &ScheduledTask,
        input: &ThresholdMaintenanceInput,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    Ran,
    UnknownType,
}

pub(crate) async fn dispatch(
    handlers: &dyn TaskHandlers,
    task: &ScheduledTask,
) -> anyhow::Result<Dispatched> {
    match &task.payload {
        TaskPayload::ThresholdMaintenance(input) => {
            handlers.threshold_maintenance(task, input).await?;
            Ok(Dispatched::Ran)
        }
        TaskPayload::Unrecognized { .. } => Ok(Dispatched::UnknownType),
    }
}
