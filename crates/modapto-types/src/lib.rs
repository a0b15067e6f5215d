use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Truncate a timestamp to whole seconds, the precision tasks are stored at.
pub fn to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(0)
}

// ──────────────────── Frequency ────────────────────

/// Unit of a recurring task's cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrequencyUnit {
    Minutes,
    Hours,
    Days,
}

impl FrequencyUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "MINUTES",
            Self::Hours => "HOURS",
            Self::Days => "DAYS",
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MINUTES" => Ok(Self::Minutes),
            "HOURS" => Ok(Self::Hours),
            "DAYS" => Ok(Self::Days),
            other => Err(format!("unknown frequency unit: {other}")),
        }
    }
}

/// Longest accepted period, in minutes (ten years).
pub const MAX_PERIOD_MINUTES: i64 = 10 * 365 * 24 * 60;

/// How often a recurring task runs, e.g. every 5 minutes.
///
/// Always positive and at most [`MAX_PERIOD_MINUTES`]; deserialization
/// enforces the same bounds as [`Frequency::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrequencyRecord")]
pub struct Frequency {
    unit: FrequencyUnit,
    value: NonZeroU32,
}

#[derive(Deserialize)]
struct FrequencyRecord {
    unit: FrequencyUnit,
    value: u32,
}

impl TryFrom<FrequencyRecord> for Frequency {
    type Error = String;

    fn try_from(record: FrequencyRecord) -> Result<Self, Self::Error> {
        Self::new(record.unit, record.value).ok_or_else(|| {
            format!(
                "frequency must be between 1 and {} minutes, got {} {}",
                MAX_PERIOD_MINUTES,
                record.value,
                record.unit.as_str()
            )
        })
    }
}

impl Frequency {
    /// Returns `None` when `value` is zero or the period exceeds
    /// [`MAX_PERIOD_MINUTES`].
    pub fn new(unit: FrequencyUnit, value: u32) -> Option<Self> {
        let per_unit = match unit {
            FrequencyUnit::Minutes => 1,
            FrequencyUnit::Hours => 60,
            FrequencyUnit::Days => 24 * 60,
        };
        if i64::from(value) * per_unit > MAX_PERIOD_MINUTES {
            return None;
        }
        NonZeroU32::new(value).map(|value| Self { unit, value })
    }

    pub fn unit(&self) -> FrequencyUnit {
        self.unit
    }

    pub fn value(&self) -> u32 {
        self.value.get()
    }

    pub fn as_duration(&self) -> Duration {
        let value = i64::from(self.value.get());
        match self.unit {
            FrequencyUnit::Minutes => Duration::minutes(value),
            FrequencyUnit::Hours => Duration::hours(value),
            FrequencyUnit::Days => Duration::days(value),
        }
    }

    /// The firing that follows an attempt made at `from`. Saturates at the
    /// latest representable time instead of overflowing.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let next = from
            .checked_add_signed(self.as_duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        to_seconds(next)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.as_str())
    }
}

// ──────────────────── Invocation Inputs ────────────────────

/// An invocation input that carries the id of the module it targets.
pub trait HasModuleId {
    fn module_id(&self) -> &str;
    fn set_module_id(&mut self, module_id: String);
}

/// An invocation input that analyses a bounded window of pilot data.
pub trait AcceptsTimeWindow {
    fn set_time_window(&mut self, from: DateTime<Utc>, to: DateTime<Utc>);
}

/// A single reading of a production component, attached to maintenance input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReading {
    pub component: String,
    pub variable: String,
    pub timestamp: String,
    pub value: f64,
}

/// Input of the threshold-based predictive maintenance smart service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdMaintenanceInput {
    #[serde(default)]
    pub module_id: String,
    #[serde(default)]
    pub smart_service_id: String,
    pub line: String,
    pub component: String,
    pub variable: String,
    #[serde(default)]
    pub starting_date: String,
    #[serde(default)]
    pub ending_date: String,
    #[serde(default)]
    pub data_source: String,
    #[serde(default)]
    pub bucket: String,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentReading>,
}

impl HasModuleId for ThresholdMaintenanceInput {
    fn module_id(&self) -> &str {
        &self.module_id
    }

    fn set_module_id(&mut self, module_id: String) {
        self.module_id = module_id;
    }
}

impl AcceptsTimeWindow for ThresholdMaintenanceInput {
    fn set_time_window(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) {
        self.starting_date = to_seconds(from).to_rfc3339();
        self.ending_date = to_seconds(to).to_rfc3339();
    }
}

/// Decoded output of the threshold-based predictive maintenance service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdMaintenanceOutput {
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub details: String,
}

/// A stored maintenance result, stamped with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdMaintenanceResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub module_id: String,
    pub smart_service_id: String,
    pub timestamp: DateTime<Utc>,
    pub recommendation: String,
    pub details: String,
}

// ──────────────────── Scheduled Tasks ────────────────────

/// Task types this build knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    ThresholdMaintenance,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThresholdMaintenance => "THRESHOLD_BASED_MAINTENANCE",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "THRESHOLD_BASED_MAINTENANCE" => Ok(Self::ThresholdMaintenance),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request body of a scheduled task, keyed by its task type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "PayloadRecord", from = "PayloadRecord")]
pub enum TaskPayload {
    ThresholdMaintenance(ThresholdMaintenanceInput),
    /// A persisted payload whose tag (or body) this build cannot decode.
    Unrecognized { tag: String, raw: Value },
}

impl TaskPayload {
    pub fn tag(&self) -> &str {
        match self {
            Self::ThresholdMaintenance(_) => TaskType::ThresholdMaintenance.as_str(),
            Self::Unrecognized { tag, .. } => tag,
        }
    }

    pub fn task_type(&self) -> Option<TaskType> {
        match self {
            Self::ThresholdMaintenance(_) => Some(TaskType::ThresholdMaintenance),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Encode the body for storage; the tag is stored alongside it.
    pub fn encode(&self) -> serde_json::Result<Value> {
        match self {
            Self::ThresholdMaintenance(input) => serde_json::to_value(input),
            Self::Unrecognized { raw, .. } => Ok(raw.clone()),
        }
    }

    /// Decode a stored body by tag. Unknown tags are kept as `Unrecognized`;
    /// a known tag with a malformed body is an error.
    pub fn decode(tag: &str, raw: Value) -> serde_json::Result<Self> {
        match tag.parse::<TaskType>() {
            Ok(TaskType::ThresholdMaintenance) => {
                Ok(Self::ThresholdMaintenance(serde_json::from_value(raw)?))
            }
            Err(_) => Ok(Self::Unrecognized {
                tag: tag.to_string(),
                raw,
            }),
        }
    }
}

/// Wire form of [`TaskPayload`]: `{ "taskType": ..., "requestBody": ... }`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadRecord {
    task_type: String,
    #[serde(default)]
    request_body: Value,
}

impl From<TaskPayload> for PayloadRecord {
    fn from(payload: TaskPayload) -> Self {
        let task_type = payload.tag().to_string();
        let request_body = payload.encode().unwrap_or(Value::Null);
        Self {
            task_type,
            request_body,
        }
    }
}

impl From<PayloadRecord> for TaskPayload {
    fn from(record: PayloadRecord) -> Self {
        match TaskPayload::decode(&record.task_type, record.request_body.clone()) {
            Ok(payload) => payload,
            Err(_) => TaskPayload::Unrecognized {
                tag: record.task_type,
                raw: record.request_body,
            },
        }
    }
}

/// A recurring smart-service invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    /// Assigned by the task store on first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub payload: TaskPayload,
    pub frequency: Frequency,
    pub module_id: String,
    pub smart_service_id: String,
    pub next_execution_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Build an unsaved task whose first firing is one period after `now`.
    pub fn new(
        payload: TaskPayload,
        frequency: Frequency,
        module_id: impl Into<String>,
        smart_service_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let now = to_seconds(now);
        Self {
            id: None,
            payload,
            frequency,
            module_id: module_id.into(),
            smart_service_id: smart_service_id.into(),
            next_execution_time: frequency.next_after(now),
            created_at: now,
        }
    }

    pub fn tag(&self) -> &str {
        self.payload.tag()
    }
}

/// A page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

// ──────────────────── Invocation ────────────────────

/// Whether the execution environment answers inline or over a separate channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationMode {
    Sync,
    Async,
}

impl InvocationMode {
    /// Value of the `X-MODAPTO-Invocation-Id` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

/// One smart-service call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub module_id: String,
    pub smart_service_id: String,
    pub payload: Value,
    pub mode: InvocationMode,
}

/// A diagnostic message attached to an invocation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Response of the execution environment's `invoke/$value` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    #[serde(default)]
    pub messages: Vec<InvocationMessage>,
    #[serde(default)]
    pub execution_state: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub inoutput_arguments: Value,
    #[serde(default)]
    pub output_arguments: Value,
}

impl InvocationResponse {
    /// Texts of the diagnostic messages, for error reporting.
    pub fn message_texts(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| m.text.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_input() -> ThresholdMaintenanceInput {
        ThresholdMaintenanceInput {
            line: "L1".into(),
            component: "press-04".into(),
            variable: "temperature".into(),
            threshold: 82.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_frequency_next_after() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let every_5m = Frequency::new(FrequencyUnit::Minutes, 5).unwrap();
        assert_eq!(every_5m.next_after(t), t + Duration::minutes(5));

        let daily = Frequency::new(FrequencyUnit::Days, 1).unwrap();
        assert_eq!(daily.next_after(t), t + Duration::hours(24));
    }

    #[test]
    fn test_frequency_rejects_periods_beyond_ten_years() {
        assert!(Frequency::new(FrequencyUnit::Hours, 4_000_000_000).is_none());
        assert!(Frequency::new(FrequencyUnit::Days, 3651).is_none());
        assert!(Frequency::new(FrequencyUnit::Days, 3650).is_some());

        let parsed: Result<Frequency, _> =
            serde_json::from_str(r#"{"unit":"HOURS","value":4000000000}"#);
        let err = parsed.unwrap_err().to_string();
        assert!(err.contains("frequency must be between"), "{err}");
    }

    #[test]
    fn test_next_after_saturates_near_max_time() {
        let longest = Frequency::new(FrequencyUnit::Days, 3650).unwrap();
        let late = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        assert_eq!(longest.next_after(late), to_seconds(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_frequency_wire_shape() {
        let every_2h = Frequency::new(FrequencyUnit::Hours, 2).unwrap();
        let json = serde_json::to_value(every_2h).unwrap();
        assert_eq!(json, serde_json::json!({"unit": "HOURS", "value": 2}));
        assert_eq!(every_2h.unit(), FrequencyUnit::Hours);
        assert_eq!(every_2h.value(), 2);
    }

    #[test]
    fn test_frequency_rejects_zero() {
        assert!(Frequency::new(FrequencyUnit::Hours, 0).is_none());
        let parsed: Result<Frequency, _> =
            serde_json::from_str(r#"{"unit":"HOURS","value":0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_new_task_truncates_to_seconds() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + Duration::milliseconds(750);
        let task = ScheduledTask::new(
            TaskPayload::ThresholdMaintenance(sample_input()),
            Frequency::new(FrequencyUnit::Minutes, 5).unwrap(),
            "mod-1",
            "svc-1",
            t,
        );
        assert_eq!(task.created_at.timestamp_subsec_nanos(), 0);
        assert_eq!(task.next_execution_time - task.created_at, Duration::minutes(5));
        assert!(task.id.is_none());
    }

    #[test]
    fn test_scheduled_task_wire_shape() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let task = ScheduledTask::new(
            TaskPayload::ThresholdMaintenance(sample_input()),
            Frequency::new(FrequencyUnit::Hours, 2).unwrap(),
            "mod-1",
            "svc-1",
            t,
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["taskType"], "THRESHOLD_BASED_MAINTENANCE");
        assert_eq!(json["requestBody"]["component"], "press-04");
        assert_eq!(json["frequency"]["unit"], "HOURS");

        let parsed: ScheduledTask = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_payload_decode_unknown_tag() {
        let raw = serde_json::json!({"anything": 1});
        let payload = TaskPayload::decode("SIMULATION", raw.clone()).unwrap();
        assert_eq!(payload.tag(), "SIMULATION");
        assert!(payload.task_type().is_none());
        assert_eq!(payload.encode().unwrap(), raw);
    }

    #[test]
    fn test_payload_decode_malformed_known_tag() {
        let raw = serde_json::json!({"line": 3});
        assert!(TaskPayload::decode("THRESHOLD_BASED_MAINTENANCE", raw).is_err());
    }

    #[test]
    fn test_time_window_and_module_id() {
        let mut input = sample_input();
        input.set_module_id("mod-9".into());
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        input.set_time_window(to - Duration::hours(1), to);
        assert_eq!(input.module_id(), "mod-9");
        assert_eq!(input.starting_date, "2024-03-01T11:00:00+00:00");
        assert_eq!(input.ending_date, "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_invocation_response_defaults() {
        let json = r#"{"success": true}"#;
        let resp: InvocationResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert!(resp.messages.is_empty());
        assert!(resp.output_arguments.is_null());
    }

    #[test]
    fn test_invocation_response_message_texts() {
        let json = r#"{
            "messages": [{"messageType": "Error", "text": "model diverged"}, {"code": "E2"}],
            "executionState": "Failed",
            "success": false
        }"#;
        let resp: InvocationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.execution_state, "Failed");
        assert_eq!(resp.message_texts(), vec!["model diverged".to_string()]);
    }

    #[test]
    fn test_invocation_mode_header() {
        assert_eq!(InvocationMode::Sync.header_value(), "sync");
        assert_eq!(InvocationMode::Async.header_value(), "async");
    }
}
