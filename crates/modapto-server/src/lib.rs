//! modapto-server: REST surface and process wiring.
//!
//! Provides:
//! - synchronous threshold-maintenance invocation, optionally scheduled to recur
//! - asynchronous fire-and-forget invocation and late result ingestion
//! - scheduled task listing and deletion
//! - Bearer token authentication on `/api`
//! - HTTP health check endpoint

pub mod error;
pub mod handlers;
pub mod task_handlers;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tokio::sync::mpsc;
use tracing::{info, warn};

use modapto_config::ModaptoConfig;
use modapto_invocation::{
    ClientCredentialsProvider, HttpModuleRegistry, SmartServiceClient,
    ThresholdMaintenanceProcessor,
};
use modapto_scheduler::{Clock, Scheduler, SchedulerEvent, SystemClock, spawn_event_listener};
use modapto_storage::{ModaptoStorage, SqliteThresholdResultStore};

use task_handlers::ScheduledInvocations;

/// Shared server state.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub client: Arc<SmartServiceClient>,
    pub threshold: Arc<ThresholdMaintenanceProcessor>,
    pub results: SqliteThresholdResultStore,
    pub events: mpsc::UnboundedSender<SchedulerEvent>,
    pub clock: Arc<dyn Clock>,
    pub auth_token: Option<String>,
}

/// Build the HTTP router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/smart-services/threshold-maintenance/invoke",
            post(handlers::invoke_threshold_maintenance),
        )
        .route("/smart-services/invoke", post(handlers::invoke_async))
        .route(
            "/smart-services/threshold-maintenance/results",
            post(handlers::ingest_threshold_maintenance_result),
        )
        .route(
            "/threshold-maintenance/results",
            get(handlers::list_threshold_maintenance_results),
        )
        .route("/scheduled-tasks", get(handlers::list_scheduled_tasks))
        .route("/scheduled-tasks/{id}", delete(handlers::delete_scheduled_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Start the server.
///
/// Opens storage, wires the invocation client and scheduler, recovers stored
/// tasks, then serves until Ctrl-C.
pub async fn start_server(config: ModaptoConfig, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(config.server.port);
    let host = config.server.host.clone();

    let db_path = config.database_path()?;
    let storage = ModaptoStorage::open(&db_path)?;
    info!("Storage initialized: {}", db_path.display());

    let http = reqwest::Client::builder()
        .timeout(config.invocation.timeout())
        .build()?;
    let credentials = Arc::new(ClientCredentialsProvider::new(
        http.clone(),
        config.auth.token_url.clone(),
        config.auth.client_id.clone(),
        config.auth.client_secret.clone(),
    ));
    let registry = Arc::new(HttpModuleRegistry::new(http, config.registry.base_url.clone()));
    let client = Arc::new(SmartServiceClient::new(
        credentials,
        registry,
        config.invocation.timeout(),
    ));

    let results = storage.threshold_results();
    let threshold = Arc::new(ThresholdMaintenanceProcessor::new(Arc::new(results.clone())));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let scheduler = Scheduler::new(
        Arc::new(storage.task_store()),
        Arc::new(ScheduledInvocations::new(
            client.clone(),
            threshold.clone(),
            clock.clone(),
        )),
        clock.clone(),
        config.scheduler.retry_delay(),
    );
    let recovered = scheduler.initialize_from_store().await?;
    if recovered > 0 {
        info!("Restored {recovered} scheduled tasks from storage");
    }

    let (events, rx) = mpsc::unbounded_channel();
    let _listener = spawn_event_listener(scheduler.clone(), rx);

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        client,
        threshold,
        results,
        events,
        clock,
        auth_token: config.server.auth_token.clone(),
    });
    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Server listening on {addr}");
    info!("  API:    http://{addr}/api/v1");
    info!("  Health: http://{addr}/health");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// GET /health: simple HTTP health check.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn require_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected_token) = &state.auth_token {
        match extract_bearer_token(&headers) {
            Some(token) if token == expected_token => {}
            _ => {
                warn!(path = %request.uri().path(), "API authentication failed");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(request).await)
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
