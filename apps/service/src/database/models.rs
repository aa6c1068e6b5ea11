use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::monitoring::types::MonitorStatus;

/// One persisted row of status history, append-only and pruned by age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: Option<i64>,
    pub monitor_id: Uuid,
    pub timestamp: SystemTime,
    pub status: MonitorStatus,
    pub message: String,
    pub ping_ms: Option<u64>,
    pub details: Option<serde_json::Value>,
}
