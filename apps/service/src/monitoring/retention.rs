//! Age-based pruning of status records.
//!
//! Runs periodically (every hour) as a background task, independent of the
//! per-check hot path.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::database::Database;

const CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// Retention window for status records.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep status records
    pub record_days: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { record_days: 30 }
    }
}

impl RetentionPolicy {
    /// Oversized windows clamp to the epoch rather than overflowing.
    fn cutoff(&self, now: SystemTime) -> SystemTime {
        let window = Duration::from_secs(self.record_days.saturating_mul(24 * 3600));
        now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// Cleanup manager for expired status records
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Delete status records strictly older than the retention window.
    pub async fn cleanup_expired_records(&self) -> Result<u64> {
        let cutoff = self.policy.cutoff(SystemTime::now());
        let deleted = self.database.prune_records_older_than(cutoff).await?;
        if deleted > 0 {
            info!(
                "retention cleanup deleted {deleted} status records older than {} days",
                self.policy.record_days
            );
        }
        Ok(deleted)
    }

    /// Start the hourly background cleanup task.
    pub fn start_periodic_cleanup(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_PERIOD);
            loop {
                interval.tick().await;
                match self.cleanup_expired_records().await {
                    Ok(deleted) => {
                        debug!("periodic retention cleanup completed ({deleted} deleted)");
                    }
                    Err(error) => {
                        warn!("periodic retention cleanup failed: {error:#}");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_the_window_behind_now() {
        let policy = RetentionPolicy { record_days: 30 };
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100 * 24 * 3600);
        assert_eq!(policy.cutoff(now), now - Duration::from_secs(30 * 24 * 3600));
    }

    #[test]
    fn absurd_retention_windows_clamp_instead_of_panicking() {
        let policy = RetentionPolicy { record_days: u64::MAX };
        assert_eq!(policy.cutoff(SystemTime::now()), SystemTime::UNIX_EPOCH);
    }
}
