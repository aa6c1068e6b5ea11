/// Monitor scheduling and execution engine
///
/// This module owns:
/// - The per-monitor recurring task lifecycle (scheduler)
/// - Protocol-specific probe runners (checker + executor)
/// - The retry/backoff policy
/// - Durable outcome recording and retention
/// - Transition detection and notification dispatch
pub mod checker;
pub mod executor;
pub mod notifier;
pub mod recorder;
pub mod retention;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use executor::MonitoringExecutor;
pub use scheduler::MonitorScheduler;
pub use types::{CheckOutcome, MonitorStatus};
