//! In-memory doubles for scheduler tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use modapto_storage::{Result as StorageResult, StorageError, TaskStore};
use modapto_types::{
    Frequency, FrequencyUnit, ScheduledTask, TaskPayload, ThresholdMaintenanceInput, to_seconds,
};

use crate::clock::Clock;
use crate::handlers::TaskHandlers;

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    next_id: AtomicUsize,
    pub saves: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_saves: AtomicBool,
    /// When set, the next save signals `save_paused` and waits for `resume_save`.
    pub pause_next_save: AtomicBool,
    pub save_paused: Notify,
    pub resume_save: Notify,
}

impl MemoryTaskStore {
    pub fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Insert directly, bypassing the counters.
    pub fn seed(&self, task: ScheduledTask) {
        let id = task.id.clone().unwrap();
        self.tasks.lock().unwrap().insert(id, task);
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &ScheduledTask) -> StorageResult<ScheduledTask> {
        if self.pause_next_save.swap(false, Ordering::SeqCst) {
            self.save_paused.notify_one();
            self.resume_save.notified().await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Json(write_failure()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut saved = task.clone();
        if saved.id.is_none() {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            saved.id = Some(format!("task-{n}"));
        }
        self.tasks
            .lock()
            .unwrap()
            .insert(saved.id.clone().unwrap(), saved.clone());
        Ok(saved)
    }

    async fn find_all(&self) -> StorageResult<Vec<ScheduledTask>> {
        Ok(self.tasks.lock().unwrap().values().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> StorageResult<Option<ScheduledTask>> {
        Ok(self.get(id))
    }

    async fn find_by_type(
        &self,
        tag: &str,
        offset: u64,
        limit: u32,
    ) -> StorageResult<Vec<ScheduledTask>> {
        let mut matching: Vec<_> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.tag() == tag)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_by_type(&self, tag: &str) -> StorageResult<u64> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.tag() == tag)
            .count() as u64)
    }

    async fn delete(&self, task: &ScheduledTask) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let id = task.id.as_ref().ok_or(StorageError::MissingId)?;
        self.tasks.lock().unwrap().remove(id);
        Ok(())
    }
}

fn write_failure() -> serde_json::Error {
    serde_json::from_str::<()>("disk full").unwrap_err()
}

/// Wall time that follows tokio's (pausable) clock from a fixed start.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap();
        to_seconds(self.base + elapsed)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum HandlerMode {
    Succeed,
    Fail,
    Panic,
}

/// Records each run by component name. Components starting with `slow`
/// block until `release` is notified.
pub struct RecordingHandlers {
    mode: HandlerMode,
    runs: Mutex<Vec<String>>,
    pub started: Notify,
    pub release: Notify,
}

impl RecordingHandlers {
    pub fn new(mode: HandlerMode) -> Self {
        Self {
            mode,
            runs: Mutex::new(Vec::new()),
            started: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn runs_of(&self, component: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == component)
            .count()
    }

    pub fn total_runs(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskHandlers for RecordingHandlers {
    async fn threshold_maintenance(
        &self,
        _task: &ScheduledTask,
        input: &ThresholdMaintenanceInput,
    ) -> anyhow::Result<()> {
        if input.component.starts_with("slow") {
            self.started.notify_one();
            self.release.notified().await;
        }
        self.runs.lock().unwrap().push(input.component.clone());
        match self.mode {
            HandlerMode::Succeed => Ok(()),
            HandlerMode::Fail => anyhow::bail!("smart service unavailable"),
            HandlerMode::Panic => panic!("handler bug"),
        }
    }
}

pub fn task(component: &str, unit: FrequencyUnit, value: u32, now: DateTime<Utc>) -> ScheduledTask {
    ScheduledTask::new(
        TaskPayload::ThresholdMaintenance(ThresholdMaintenanceInput {
            line: "L1".into(),
            component: component.into(),
            variable: "temperature".into(),
            threshold: 80.0,
            ..Default::default()
        }),
        Frequency::new(unit, value).unwrap(),
        "crf-1",
        "svc-threshold",
        now,
    )
}
