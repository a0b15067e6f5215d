//! REST handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use modapto_invocation::{NoOpProcessor, ResponseProcessor};
use modapto_scheduler::SchedulerEvent;
use modapto_types::{
    Frequency, InvocationMode, InvocationRequest, InvocationResponse, Page, ScheduledTask,
    TaskPayload, ThresholdMaintenanceInput, ThresholdMaintenanceResult,
};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

const DEFAULT_PAGE_SIZE: u32 = 20;

/// Threshold-maintenance input, optionally asking for it to recur.
#[derive(Debug, Deserialize)]
pub struct ThresholdMaintenanceRequest {
    #[serde(flatten)]
    pub input: ThresholdMaintenanceInput,
    #[serde(default)]
    pub frequency: Option<Frequency>,
}

/// POST /api/v1/smart-services/threshold-maintenance/invoke
///
/// Runs the service synchronously and returns the stored result. With a
/// `frequency`, the same input is also scheduled to recur.
pub async fn invoke_threshold_maintenance(
    State(state): State<Arc<AppState>>,
    req: Result<Json<ThresholdMaintenanceRequest>, JsonRejection>,
) -> ApiResult<Json<ThresholdMaintenanceResult>> {
    let Json(req) = req?;
    let ThresholdMaintenanceRequest { input, frequency } = req;
    let request = InvocationRequest {
        module_id: input.module_id.clone(),
        smart_service_id: input.smart_service_id.clone(),
        payload: serde_json::to_value(&input).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        mode: InvocationMode::Sync,
    };

    let result = state
        .client
        .invoke_and_process(&request, state.threshold.as_ref())
        .await?;

    if let Some(frequency) = frequency {
        let task = ScheduledTask::new(
            TaskPayload::ThresholdMaintenance(input),
            frequency,
            request.module_id,
            request.smart_service_id,
            state.clock.now(),
        );
        info!(module_id = %task.module_id, %frequency, "Requesting recurring threshold maintenance");
        state
            .events
            .send(SchedulerEvent::Register(task))
            .map_err(|_| ApiError::Unavailable("scheduler is not running".into()))?;
    }

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncInvokeRequest {
    pub module_id: String,
    pub smart_service_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// POST /api/v1/smart-services/invoke
///
/// Fire-and-forget: the result arrives later on the asynchronous channel.
pub async fn invoke_async(
    State(state): State<Arc<AppState>>,
    req: Result<Json<AsyncInvokeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InvocationResponse>)> {
    let Json(req) = req?;
    let request = InvocationRequest {
        module_id: req.module_id,
        smart_service_id: req.smart_service_id,
        payload: req.payload,
        mode: InvocationMode::Async,
    };
    let response = state.client.invoke_request(&request).await?;
    NoOpProcessor
        .process(
            Some(&response),
            &request.module_id,
            &request.smart_service_id,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultNotification {
    pub module_id: String,
    pub smart_service_id: String,
    #[serde(default)]
    pub response: Option<InvocationResponse>,
}

/// POST /api/v1/smart-services/threshold-maintenance/results
///
/// Ingests a response delivered on the asynchronous channel.
pub async fn ingest_threshold_maintenance_result(
    State(state): State<Arc<AppState>>,
    note: Result<Json<ResultNotification>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ThresholdMaintenanceResult>)> {
    let Json(note) = note?;
    if note.module_id.trim().is_empty() || note.smart_service_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "moduleId and smartServiceId are required".into(),
        ));
    }
    let result = state
        .threshold
        .process(
            note.response.as_ref(),
            &note.module_id,
            &note.smart_service_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub module_id: Option<String>,
}

/// GET /api/v1/threshold-maintenance/results
pub async fn list_threshold_maintenance_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultsQuery>,
) -> ApiResult<Json<Vec<ThresholdMaintenanceResult>>> {
    let results = state.results.list(query.module_id.as_deref()).await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    pub task_type: String,
    #[serde(default)]
    pub page: u32,
    pub size: Option<u32>,
}

/// GET /api/v1/scheduled-tasks
pub async fn list_scheduled_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TasksQuery>,
) -> ApiResult<Json<Page<ScheduledTask>>> {
    if query.task_type.trim().is_empty() {
        return Err(ApiError::BadRequest("task_type is required".into()));
    }
    let page = state
        .scheduler
        .list_tasks_by_type(
            &query.task_type,
            query.page,
            query.size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}

/// DELETE /api/v1/scheduled-tasks/{id}
pub async fn delete_scheduled_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete_task(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
