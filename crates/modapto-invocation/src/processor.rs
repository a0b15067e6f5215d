//! Response processors: what happens to an invocation's result.
//!
//! The processor is chosen per call site, not per response content. A call
//! whose real output arrives later on the asynchronous channel uses
//! [`NoOpProcessor`]; a call that needs a typed, stored result uses a
//! decoding processor such as [`ThresholdMaintenanceProcessor`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use modapto_storage::ResultStore;
use modapto_types::{
    InvocationResponse, ThresholdMaintenanceOutput, ThresholdMaintenanceResult, to_seconds,
};

use crate::{InvocationError, Result};

#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    type Output: Send;

    /// `response` is `None` when the call produced no response body worth
    /// reading, e.g. a null payload on the asynchronous channel.
    async fn process(
        &self,
        response: Option<&InvocationResponse>,
        module_id: &str,
        smart_service_id: &str,
    ) -> Result<Self::Output>;
}

/// Ignores the response entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl ResponseProcessor for NoOpProcessor {
    type Output = ();

    async fn process(
        &self,
        _response: Option<&InvocationResponse>,
        _module_id: &str,
        _smart_service_id: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Decodes threshold-based maintenance output and stores it.
pub struct ThresholdMaintenanceProcessor {
    store: Arc<dyn ResultStore<ThresholdMaintenanceResult>>,
}

impl ThresholdMaintenanceProcessor {
    pub fn new(store: Arc<dyn ResultStore<ThresholdMaintenanceResult>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResponseProcessor for ThresholdMaintenanceProcessor {
    type Output = ThresholdMaintenanceResult;

    async fn process(
        &self,
        response: Option<&InvocationResponse>,
        module_id: &str,
        smart_service_id: &str,
    ) -> Result<ThresholdMaintenanceResult> {
        let response = response.ok_or_else(|| {
            InvocationError::RemoteExecutionFailed(vec!["no response received".into()])
        })?;

        if !response.success {
            let messages = response.message_texts();
            warn!(
                module_id,
                smart_service_id,
                state = %response.execution_state,
                "Threshold maintenance execution failed: {messages:?}"
            );
            return Err(InvocationError::RemoteExecutionFailed(messages));
        }

        let output = decode_output::<ThresholdMaintenanceOutput>(response)?;
        let result = ThresholdMaintenanceResult {
            id: None,
            module_id: module_id.to_string(),
            smart_service_id: smart_service_id.to_string(),
            timestamp: to_seconds(Utc::now()),
            recommendation: output.recommendation,
            details: output.details,
        };

        let saved = self.store.save(&result).await?;
        info!(module_id, smart_service_id, result_id = ?saved.id, "Stored maintenance result");
        Ok(saved)
    }
}

/// Keys that carry an argument's payload. Metadata such as `idShort` or
/// `modelType` is never mistaken for output.
const OUTPUT_KEYS: [&str; 3] = ["value", "result", "output"];

/// Find the encoded output in an operation-variable list or object.
///
/// Handles both `[{"value": {"idShort": .., "value": "<data>"}}]` and
/// `{"result": "<data>"}` shapes.
fn encoded_output(args: &Value) -> Option<&str> {
    match args {
        Value::String(s) => Some(s),
        Value::Array(items) => items.iter().find_map(encoded_output),
        Value::Object(map) => OUTPUT_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(encoded_output),
        _ => None,
    }
}

/// Decode the output argument, which is base64-encoded JSON or plain JSON.
fn decode_output<T: serde::de::DeserializeOwned>(response: &InvocationResponse) -> Result<T> {
    let encoded = encoded_output(&response.output_arguments)
        .or_else(|| encoded_output(&response.inoutput_arguments))
        .ok_or_else(|| InvocationError::Decode("response has no output argument".into()))?;

    let bytes = match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(_) => encoded.as_bytes().to_vec(),
    };

    serde_json::from_slice(&bytes)
        .map_err(|e| InvocationError::Decode(format!("output is not valid JSON: {e}")))
}
