//! Threshold-based maintenance result storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::Connection;
use rusqlite::types::Type;
use tokio::sync::Mutex;

use modapto_types::ThresholdMaintenanceResult;

use crate::{Result, ResultStore, with_conn};

#[derive(Clone)]
pub struct SqliteThresholdResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteThresholdResultStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// List stored results, newest first, optionally for a single module.
    pub async fn list(&self, module_id: Option<&str>) -> Result<Vec<ThresholdMaintenanceResult>> {
        let module_id = module_id.map(String::from);
        with_conn(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, module_id, smart_service_id, timestamp, recommendation, details
                 FROM threshold_maintenance_results
                 WHERE ?1 IS NULL OR module_id = ?1
                 ORDER BY timestamp DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![module_id], |row| {
                    let secs: i64 = row.get(3)?;
                    let timestamp = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            Type::Integer,
                            format!("bad timestamp {secs}").into(),
                        )
                    })?;
                    Ok(ThresholdMaintenanceResult {
                        id: row.get(0)?,
                        module_id: row.get(1)?,
                        smart_service_id: row.get(2)?,
                        timestamp,
                        recommendation: row.get(4)?,
                        details: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl ResultStore<ThresholdMaintenanceResult> for SqliteThresholdResultStore {
    async fn save(&self, result: &ThresholdMaintenanceResult) -> Result<ThresholdMaintenanceResult> {
        let mut saved = result.clone();
        if saved.id.is_none() {
            saved.id = Some(uuid::Uuid::new_v4().to_string());
        }
        let record = saved.clone();
        with_conn(&self.conn, move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO threshold_maintenance_results
                    (id, module_id, smart_service_id, timestamp, recommendation, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.id,
                    record.module_id,
                    record.smart_service_id,
                    record.timestamp.timestamp(),
                    record.recommendation,
                    record.details,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(saved)
    }
}
