use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Final classification of one check cycle.
///
/// `Pending` means the probe failed but the retry budget is not exhausted
/// yet; it never triggers notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Pending,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(MonitorStatus::Up),
            "down" => Some(MonitorStatus::Down),
            "pending" => Some(MonitorStatus::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one probe execution. Never mutated after the run loop has
/// finalized it; the builder methods consume and return the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// UUID of the monitor that was checked
    pub monitor_id: Uuid,

    /// Classification of this check
    pub status: MonitorStatus,

    /// Human-readable explanation (error text, status line, loss summary)
    pub message: String,

    /// Measured latency in milliseconds, when the probe produces one
    pub ping_ms: Option<u64>,

    /// Structured extras such as certificate expiry
    pub details: Option<serde_json::Value>,

    /// Timestamp when the check was performed
    pub timestamp: SystemTime,
}

impl CheckOutcome {
    pub fn new(monitor_id: Uuid, status: MonitorStatus, message: impl Into<String>) -> Self {
        Self {
            monitor_id,
            status,
            message: message.into(),
            ping_ms: None,
            details: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_ping(mut self, ping_ms: u64) -> Self {
        self.ping_ms = Some(ping_ms);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Replace the raw up/down classification with the retry policy's verdict.
    pub fn with_status(mut self, status: MonitorStatus) -> Self {
        self.status = status;
        self
    }
}
