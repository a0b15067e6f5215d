//! Scheduled-task execution: turns a due task into a smart-service call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use modapto_invocation::{SmartServiceClient, ThresholdMaintenanceProcessor};
use modapto_scheduler::{Clock, TaskHandlers};
use modapto_types::{
    AcceptsTimeWindow, HasModuleId, InvocationMode, InvocationRequest, ScheduledTask,
    ThresholdMaintenanceInput,
};

/// Runs scheduled tasks as synchronous invocations.
///
/// Each firing analyses the window covering one period back from now, so
/// consecutive runs see adjacent slices of pilot data.
pub struct ScheduledInvocations {
    client: Arc<SmartServiceClient>,
    threshold: Arc<ThresholdMaintenanceProcessor>,
    clock: Arc<dyn Clock>,
}

impl ScheduledInvocations {
    pub fn new(
        client: Arc<SmartServiceClient>,
        threshold: Arc<ThresholdMaintenanceProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            threshold,
            clock,
        }
    }
}

#[async_trait]
impl TaskHandlers for ScheduledInvocations {
    async fn threshold_maintenance(
        &self,
        task: &ScheduledTask,
        input: &ThresholdMaintenanceInput,
    ) -> anyhow::Result<()> {
        let now = self.clock.now();
        let mut input = input.clone();
        input.set_module_id(task.module_id.clone());
        input.smart_service_id = task.smart_service_id.clone();
        input.set_time_window(now - task.frequency.as_duration(), now);

        let request = InvocationRequest {
            module_id: task.module_id.clone(),
            smart_service_id: task.smart_service_id.clone(),
            payload: serde_json::to_value(&input)?,
            mode: InvocationMode::Sync,
        };
        let result = self
            .client
            .invoke_and_process(&request, self.threshold.as_ref())
            .await?;

        info!(
            task_id = ?task.id,
            module_id = %input.module_id(),
            recommendation = %result.recommendation,
            "Threshold maintenance run stored"
        );
        Ok(())
    }
}
