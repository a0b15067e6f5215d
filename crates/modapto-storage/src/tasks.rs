//! SQLite-backed scheduled task storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use modapto_types::{Frequency, FrequencyUnit, ScheduledTask, TaskPayload};

use crate::{Result, StorageError, TaskStore, with_conn};

const COLUMNS: &str = "id, task_type, request_body, frequency_unit, frequency_value, \
     module_id, smart_service_id, next_execution_time, created_at";

/// Persistent storage for scheduled tasks.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("bad timestamp {secs}")))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let id: String = row.get(0)?;
    let tag: String = row.get(1)?;
    let body: String = row.get(2)?;
    let raw: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| conversion_error(2, Type::Text, e.to_string()))?;

    // A malformed body must not hide the task: it stays listable and deletable.
    let payload = TaskPayload::decode(&tag, raw.clone()).unwrap_or_else(|e| {
        tracing::warn!(task_id = %id, task_type = %tag, "Undecodable request body: {e}");
        TaskPayload::Unrecognized { tag: tag.clone(), raw }
    });

    let unit: FrequencyUnit = row
        .get::<_, String>(3)?
        .parse()
        .map_err(|e: String| conversion_error(3, Type::Text, format!("task {id}: {e}")))?;
    let value: u32 = row.get(4)?;
    let frequency = Frequency::new(unit, value).ok_or_else(|| {
        conversion_error(
            4,
            Type::Integer,
            format!("task {id}: frequency value {value} out of range"),
        )
    })?;

    Ok(ScheduledTask {
        id: Some(id),
        payload,
        frequency,
        module_id: row.get(5)?,
        smart_service_id: row.get(6)?,
        next_execution_time: timestamp(row, 7)?,
        created_at: timestamp(row, 8)?,
    })
}

/// Collect decodable rows. A row whose columns no longer convert is skipped
/// with a warning so one bad record cannot block recovery of the rest.
fn readable<I>(rows: I) -> rusqlite::Result<Vec<ScheduledTask>>
where
    I: Iterator<Item = rusqlite::Result<ScheduledTask>>,
{
    let mut tasks = Vec::new();
    for row in rows {
        match row {
            Ok(task) => tasks.push(task),
            Err(
                e @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => {
                tracing::warn!("Skipping unreadable scheduled task row: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(tasks)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, task: &ScheduledTask) -> Result<ScheduledTask> {
        let mut saved = task.clone();
        if saved.id.is_none() {
            saved.id = Some(uuid::Uuid::new_v4().to_string());
        }
        let body = serde_json::to_string(&saved.payload.encode()?)?;
        let record = saved.clone();

        with_conn(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks
                    (id, task_type, request_body, frequency_unit, frequency_value,
                     module_id, smart_service_id, next_execution_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    task_type = excluded.task_type,
                    request_body = excluded.request_body,
                    frequency_unit = excluded.frequency_unit,
                    frequency_value = excluded.frequency_value,
                    module_id = excluded.module_id,
                    smart_service_id = excluded.smart_service_id,
                    next_execution_time = excluded.next_execution_time",
                rusqlite::params![
                    record.id,
                    record.tag(),
                    body,
                    record.frequency.unit().as_str(),
                    record.frequency.value(),
                    record.module_id,
                    record.smart_service_id,
                    record.next_execution_time.timestamp(),
                    record.created_at.timestamp(),
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(saved)
    }

    async fn find_all(&self) -> Result<Vec<ScheduledTask>> {
        with_conn(&self.conn, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_tasks ORDER BY next_execution_time"
            ))?;
            let tasks = readable(stmt.query_map([], row_to_task)?)?;
            Ok(tasks)
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let id = id.to_string();
        with_conn(&self.conn, move |conn| {
            let task = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    row_to_task,
                )
                .optional()?;
            Ok(task)
        })
        .await
    }

    async fn find_by_type(
        &self,
        tag: &str,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<ScheduledTask>> {
        let tag = tag.to_string();
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        with_conn(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_tasks WHERE task_type = ?1
                 ORDER BY created_at, id LIMIT ?2 OFFSET ?3"
            ))?;
            let tasks = readable(stmt.query_map(
                rusqlite::params![tag, limit, offset],
                row_to_task,
            )?)?;
            Ok(tasks)
        })
        .await
    }

    async fn count_by_type(&self, tag: &str) -> Result<u64> {
        let tag = tag.to_string();
        with_conn(&self.conn, move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM scheduled_tasks WHERE task_type = ?1",
                rusqlite::params![tag],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn delete(&self, task: &ScheduledTask) -> Result<()> {
        let id = task.id.clone().ok_or(StorageError::MissingId)?;
        with_conn(&self.conn, move |conn| {
            conn.execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1",
                rusqlite::params![id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModaptoStorage;
    use chrono::{Duration, TimeZone};
    use modapto_types::ThresholdMaintenanceInput;

    fn new_task(component: &str, created: DateTime<Utc>) -> ScheduledTask {
        ScheduledTask::new(
            TaskPayload::ThresholdMaintenance(ThresholdMaintenanceInput {
                line: "L2".into(),
                component: component.into(),
                variable: "vibration".into(),
                threshold: 4.2,
                ..Default::default()
            }),
            Frequency::new(FrequencyUnit::Minutes, 5).unwrap(),
            "mod-crf",
            "svc-threshold",
            created,
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_round_trips() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        let saved = store.save(&new_task("spindle", t0())).await.unwrap();
        let id = saved.id.clone().unwrap();

        let loaded = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.next_execution_time, t0() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_find_by_id_not_found() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        assert!(store.find_by_id("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_id_and_created_at() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        let saved = store.save(&new_task("spindle", t0())).await.unwrap();

        let mut updated = saved.clone();
        updated.next_execution_time = t0() + Duration::hours(3);
        updated.created_at = t0() + Duration::days(1);
        let again = store.save(&updated).await.unwrap();
        assert_eq!(again.id, saved.id);

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].next_execution_time, t0() + Duration::hours(3));
        assert_eq!(all[0].created_at, t0());
    }

    #[tokio::test]
    async fn test_find_by_type_paginates() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        for i in 0..5 {
            store
                .save(&new_task(&format!("c{i}"), t0() + Duration::minutes(i)))
                .await
                .unwrap();
        }

        let tag = "THRESHOLD_BASED_MAINTENANCE";
        assert_eq!(store.count_by_type(tag).await.unwrap(), 5);
        assert_eq!(store.count_by_type("SIMULATION").await.unwrap(), 0);

        let page = store.find_by_type(tag, 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        match &page[0].payload {
            TaskPayload::ThresholdMaintenance(input) => assert_eq!(input.component, "c2"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        let saved = store.save(&new_task("spindle", t0())).await.unwrap();
        store.delete(&saved).await.unwrap();
        assert!(store.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_id() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        let result = store.delete(&new_task("spindle", t0())).await;
        assert!(matches!(result, Err(StorageError::MissingId)));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_kept() {
        let storage = ModaptoStorage::open_in_memory().unwrap();
        let store = storage.task_store();
        let mut task = new_task("spindle", t0());
        task.payload = TaskPayload::Unrecognized {
            tag: "SIMULATION".into(),
            raw: serde_json::json!({"horizon": 12}),
        };
        let saved = store.save(&task).await.unwrap();

        let loaded = store.find_by_id(saved.id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.tag(), "SIMULATION");
        assert!(loaded.payload.task_type().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let store = ModaptoStorage::open_in_memory().unwrap().task_store();
        let good = store.save(&new_task("spindle", t0())).await.unwrap();

        {
            let conn = store.conn.lock().await;
            for (id, unit, value) in [("bad-unit", "WEEKS", 1), ("zero", "HOURS", 0)] {
                conn.execute(
                    "INSERT INTO scheduled_tasks
                        (id, task_type, request_body, frequency_unit, frequency_value,
                         module_id, smart_service_id, next_execution_time, created_at)
                     VALUES (?1, 'THRESHOLD_BASED_MAINTENANCE', '{}', ?2, ?3,
                             'mod-crf', 'svc-threshold', 0, 0)",
                    rusqlite::params![id, unit, value],
                )
                .unwrap();
            }
        }

        let all = store.find_all().await.unwrap();
        assert_eq!(all, vec![good.clone()]);

        let page = store
            .find_by_type("THRESHOLD_BASED_MAINTENANCE", 0, 10)
            .await
            .unwrap();
        assert_eq!(page, vec![good]);
    }
}
