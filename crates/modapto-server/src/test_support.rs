//! Shared doubles for server tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use modapto_invocation::{CredentialProvider, ModuleRegistry, SmartServiceClient};
use modapto_scheduler::Clock;
use modapto_types::{
    Frequency, FrequencyUnit, ScheduledTask, TaskPayload, ThresholdMaintenanceInput,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

struct StaticCredentials;

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn acquire_token(&self) -> modapto_invocation::Result<String> {
        Ok("test-token".into())
    }
}

struct FixedRegistry(String);

#[async_trait]
impl ModuleRegistry for FixedRegistry {
    async fn resolve_service_address(
        &self,
        _module_id: &str,
        _smart_service_id: &str,
    ) -> modapto_invocation::Result<String> {
        Ok(self.0.clone())
    }
}

/// A client whose every smart service lives at `address`.
pub fn client_for(address: &str) -> Arc<SmartServiceClient> {
    Arc::new(SmartServiceClient::new(
        Arc::new(StaticCredentials),
        Arc::new(FixedRegistry(address.to_string())),
        Duration::from_secs(5),
    ))
}

/// A completed threshold-maintenance response recommending a bearing swap.
pub fn success_body() -> Value {
    json!({
        "success": true,
        "executionState": "Completed",
        "outputArguments": [{
            "value": {
                "idShort": "result",
                "value": "eyJyZWNvbW1lbmRhdGlvbiI6IlJlcGxhY2UgYmVhcmluZyIsImRldGFpbHMiOiJ0ZW1wZXJhdHVyZSBhYm92ZSA4MCJ9"
            }
        }]
    })
}

pub fn sample_task() -> ScheduledTask {
    ScheduledTask::new(
        TaskPayload::ThresholdMaintenance(ThresholdMaintenanceInput {
            line: "L1".into(),
            component: "press-04".into(),
            variable: "temperature".into(),
            threshold: 80.0,
            ..Default::default()
        }),
        Frequency::new(FrequencyUnit::Hours, 1).unwrap(),
        "crf-1",
        "svc-threshold",
        t0(),
    )
}
