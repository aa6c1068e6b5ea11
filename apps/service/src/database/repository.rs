use anyhow::{Context, Result};
use async_trait::async_trait;
use libsql::{Row, params};
use std::time::SystemTime;
use uuid::Uuid;

use super::models::StatusRecord;
use crate::models::monitor::{Monitor, ProbeConfig};
use crate::monitoring::types::{CheckOutcome, MonitorStatus};
use crate::pool::{LibsqlManager, LibsqlPool};
use crate::validation::validate_monitor;

/// Persistence collaborator consumed by the engine.
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all monitors the scheduler should run
    async fn list_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// Get a monitor by id
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>>;

    /// Create or update a monitor definition
    async fn save_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Delete a monitor and (via cascade) its status history
    async fn delete_monitor(&self, id: Uuid) -> Result<()>;

    /// Append a status record and update the monitor's cached
    /// last-status/last-check in one transaction
    async fn record_outcome(&self, outcome: &CheckOutcome) -> Result<i64>;

    /// Most recent status records for a monitor, newest first
    async fn get_recent_records(&self, id: Uuid, limit: usize) -> Result<Vec<StatusRecord>>;

    /// Delete status records strictly older than the cutoff; returns the
    /// number of rows removed
    async fn prune_records_older_than(&self, cutoff: SystemTime) -> Result<u64>;

    /// Store the last-seen time for a push monitor's token
    async fn record_heartbeat(&self, token: &str, at: SystemTime) -> Result<()>;

    /// Last-seen time for a push monitor's token, if any heartbeat arrived
    async fn last_heartbeat(&self, token: &str) -> Result<Option<SystemTime>>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

const MONITOR_COLUMNS: &str = "id, name, monitor_type, active, interval_seconds, retries, \
     retry_interval_seconds, resend_interval_seconds, timeout_seconds, upside_down, \
     config_json, last_status, last_check_at, created_at, updated_at";

fn decode_monitor(row: &Row) -> Result<Monitor> {
    let id: String = row.get(0)?;
    let config_json: String = row.get(10)?;
    let probe: ProbeConfig = serde_json::from_str(&config_json)
        .with_context(|| format!("corrupt probe configuration for monitor {id}"))?;
    let last_status: Option<String> = row.get(11)?;
    let last_check_at: Option<i64> = row.get(12)?;

    Ok(Monitor {
        id: Uuid::parse_str(&id)?,
        name: row.get(1)?,
        active: row.get::<i64>(3)? != 0,
        interval_seconds: row.get::<i64>(4)? as u64,
        retries: row.get::<i64>(5)? as u32,
        retry_interval_seconds: row.get::<i64>(6)? as u64,
        resend_interval_seconds: row.get::<i64>(7)? as u64,
        timeout_seconds: row.get::<i64>(8)? as u64,
        upside_down: row.get::<i64>(9)? != 0,
        probe,
        last_status: last_status.as_deref().and_then(MonitorStatus::parse),
        last_check_at: last_check_at.map(Monitor::i64_to_timestamp),
        created_at: Monitor::i64_to_timestamp(row.get(13)?),
        updated_at: Monitor::i64_to_timestamp(row.get(14)?),
    })
}

fn decode_record(row: &Row) -> Result<StatusRecord> {
    let monitor_id: String = row.get(1)?;
    let status: String = row.get(3)?;
    let details: Option<String> = row.get(6)?;

    Ok(StatusRecord {
        id: Some(row.get(0)?),
        monitor_id: Uuid::parse_str(&monitor_id)?,
        timestamp: Monitor::i64_to_timestamp(row.get(2)?),
        status: MonitorStatus::parse(&status)
            .with_context(|| format!("corrupt status value \"{status}\""))?,
        message: row.get(4)?,
        ping_ms: row.get::<Option<i64>>(5)?.map(|v| v as u64),
        details: details.as_deref().map(serde_json::from_str).transpose()?,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_active_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1"))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(decode_monitor(&row)?);
        }
        Ok(monitors)
    }

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"))
            .await?;

        let mut rows = stmt.query(params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(decode_monitor(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        validate_monitor(monitor)?;

        let conn = self.get_conn().await?;
        let config_json = serde_json::to_string(&monitor.probe)?;

        conn.execute(
            "INSERT INTO monitors (id, name, monitor_type, active, interval_seconds, retries, \
             retry_interval_seconds, resend_interval_seconds, timeout_seconds, upside_down, \
             config_json, last_status, last_check_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               name = excluded.name, \
               monitor_type = excluded.monitor_type, \
               active = excluded.active, \
               interval_seconds = excluded.interval_seconds, \
               retries = excluded.retries, \
               retry_interval_seconds = excluded.retry_interval_seconds, \
               resend_interval_seconds = excluded.resend_interval_seconds, \
               timeout_seconds = excluded.timeout_seconds, \
               upside_down = excluded.upside_down, \
               config_json = excluded.config_json, \
               updated_at = excluded.updated_at",
            params![
                monitor.id.to_string(),
                monitor.name.clone(),
                monitor.probe.kind(),
                if monitor.active { 1 } else { 0 },
                monitor.interval_seconds as i64,
                monitor.retries as i64,
                monitor.retry_interval_seconds as i64,
                monitor.resend_interval_seconds as i64,
                monitor.timeout_seconds as i64,
                if monitor.upside_down { 1 } else { 0 },
                config_json,
                monitor.last_status.map(|s| s.as_str()),
                monitor.last_check_at.map(Monitor::timestamp_to_i64),
                Monitor::timestamp_to_i64(monitor.created_at),
                Monitor::timestamp_to_i64(monitor.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_monitor(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;

        // SQLite only honors the FK cascade when the foreign_keys pragma is
        // set per connection; delete the history explicitly instead.
        let tx = conn.transaction().await?;
        tx.execute("DELETE FROM status_records WHERE monitor_id = ?", params![id.to_string()])
            .await?;
        tx.execute("DELETE FROM monitors WHERE id = ?", params![id.to_string()]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_outcome(&self, outcome: &CheckOutcome) -> Result<i64> {
        let conn = self.get_conn().await?;
        let timestamp = Monitor::timestamp_to_i64(outcome.timestamp);
        let details = outcome.details.as_ref().map(serde_json::to_string).transpose()?;

        // History row and cached status must land together: readers never
        // see one without the other.
        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO status_records (monitor_id, timestamp, status, message, ping_ms, details) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                outcome.monitor_id.to_string(),
                timestamp,
                outcome.status.as_str(),
                outcome.message.clone(),
                outcome.ping_ms.map(|v| v as i64),
                details
            ],
        )
        .await?;
        tx.execute(
            "UPDATE monitors SET last_status = ?, last_check_at = ? WHERE id = ?",
            params![outcome.status.as_str(), timestamp, outcome.monitor_id.to_string()],
        )
        .await?;
        tx.commit().await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_recent_records(&self, id: Uuid, limit: usize) -> Result<Vec<StatusRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, monitor_id, timestamp, status, message, ping_ms, details \
                 FROM status_records WHERE monitor_id = ? ORDER BY timestamp DESC LIMIT ?",
            )
            .await?;

        let mut rows = stmt.query(params![id.to_string(), limit as i64]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(decode_record(&row)?);
        }
        Ok(records)
    }

    async fn prune_records_older_than(&self, cutoff: SystemTime) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM status_records WHERE timestamp < ?",
                params![Monitor::timestamp_to_i64(cutoff)],
            )
            .await?;
        Ok(deleted)
    }

    async fn record_heartbeat(&self, token: &str, at: SystemTime) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO push_heartbeats (token, last_seen) VALUES (?, ?) \
             ON CONFLICT(token) DO UPDATE SET last_seen = excluded.last_seen",
            params![token, Monitor::timestamp_to_i64(at)],
        )
        .await?;
        Ok(())
    }

    async fn last_heartbeat(&self, token: &str) -> Result<Option<SystemTime>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT last_seen FROM push_heartbeats WHERE token = ?", params![token])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Monitor::i64_to_timestamp(row.get(0)?))),
            None => Ok(None),
        }
    }
}
