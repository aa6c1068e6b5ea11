use std::sync::Arc;
use tracing::warn;

use crate::database::Database;

use super::types::CheckOutcome;

/// Persists outcomes through the database collaborator. A write failure is
/// logged and swallowed so the run loop always re-arms.
pub struct StatusRecorder {
    database: Arc<dyn Database>,
}

impl StatusRecorder {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Append the outcome as a status record and update the monitor's cached
    /// last-status, atomically. Returns whether the write succeeded.
    pub async fn record(&self, outcome: &CheckOutcome) -> bool {
        match self.database.record_outcome(outcome).await {
            Ok(_) => true,
            Err(error) => {
                warn!(
                    monitor_id = %outcome.monitor_id,
                    "failed to persist check outcome: {error:#}"
                );
                false
            }
        }
    }
}
