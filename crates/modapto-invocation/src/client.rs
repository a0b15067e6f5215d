//! Smart-service invocation over HTTP.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use modapto_types::{InvocationMode, InvocationRequest, InvocationResponse};

use crate::credentials::CredentialProvider;
use crate::processor::ResponseProcessor;
use crate::registry::ModuleRegistry;
use crate::{InvocationError, Result};

/// Header telling the execution environment how to deliver the result.
pub const INVOCATION_MODE_HEADER: &str = "X-MODAPTO-Invocation-Id";

/// Performs one call per invocation. Retries are the caller's business.
pub struct SmartServiceClient {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<dyn ModuleRegistry>,
}

impl SmartServiceClient {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<dyn ModuleRegistry>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {e}");
                Client::new()
            });
        Self {
            client,
            credentials,
            registry,
        }
    }

    /// Invoke `smart_service_id` on `module_id` with `payload`.
    ///
    /// Empty identifiers or a null payload fail with `InvalidInput` before
    /// any credential or registry call is made.
    pub async fn invoke(
        &self,
        smart_service_id: &str,
        module_id: &str,
        payload: &Value,
        mode: InvocationMode,
    ) -> Result<InvocationResponse> {
        if smart_service_id.trim().is_empty() {
            return Err(InvocationError::InvalidInput("smart service id is required".into()));
        }
        if module_id.trim().is_empty() {
            return Err(InvocationError::InvalidInput("module id is required".into()));
        }
        if payload.is_null() {
            return Err(InvocationError::InvalidInput("payload is required".into()));
        }

        let token = self.credentials.acquire_token().await?;
        let address = self
            .registry
            .resolve_service_address(module_id, smart_service_id)
            .await?;
        let url = format!("{address}/invoke/$value");

        info!(
            module_id,
            smart_service_id,
            mode = mode.header_value(),
            "Invoking smart service"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header(INVOCATION_MODE_HEADER, mode.header_value())
            .json(payload)
            .send()
            .await
            .map_err(|e| InvocationError::Transport(format!("invoke request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| InvocationError::Transport(format!("invoke response read failed: {e}")))?;

        if status.is_client_error() {
            return Err(InvocationError::ClientInvocation {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(InvocationError::ServerInvocation {
                status: status.as_u16(),
                body,
            });
        }

        debug!(module_id, smart_service_id, %status, "Smart service responded");

        if body.trim().is_empty() && mode == InvocationMode::Async {
            // Accepted; the result arrives on the asynchronous channel.
            return Ok(InvocationResponse {
                success: true,
                execution_state: "Initiated".into(),
                ..Default::default()
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| InvocationError::Decode(format!("invalid invocation response: {e}")))
    }

    /// Invoke using a prepared request.
    pub async fn invoke_request(&self, request: &InvocationRequest) -> Result<InvocationResponse> {
        self.invoke(
            &request.smart_service_id,
            &request.module_id,
            &request.payload,
            request.mode,
        )
        .await
    }

    /// Invoke and hand the response to `processor`.
    pub async fn invoke_and_process<P: ResponseProcessor>(
        &self,
        request: &InvocationRequest,
        processor: &P,
    ) -> Result<P::Output> {
        let response = self.invoke_request(request).await?;
        processor
            .process(
                Some(&response),
                &request.module_id,
                &request.smart_service_id,
            )
            .await
    }
}
