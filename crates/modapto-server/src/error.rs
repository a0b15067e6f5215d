//! REST error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use modapto_invocation::InvocationError;
use modapto_scheduler::SchedulerError;
use modapto_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Invocation(e) => match e {
                InvocationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                InvocationError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
                InvocationError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                InvocationError::AuthenticationFailed(_)
                | InvocationError::ClientInvocation { .. }
                | InvocationError::ServerInvocation { .. }
                | InvocationError::Transport(_)
                | InvocationError::RemoteExecutionFailed(_)
                | InvocationError::Decode(_) => StatusCode::BAD_GATEWAY,
            },
            Self::Scheduler(SchedulerError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Scheduler(SchedulerError::ShutDown) | Self::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Scheduler(SchedulerError::Persistence(_)) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(%status, "Request failed: {self}");
        }
        let body = ErrorBody {
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
