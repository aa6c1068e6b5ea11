use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::models::monitor::Monitor;

use super::executor::MonitoringExecutor;
use super::notifier::{GateState, NotificationGate, decide};
use super::recorder::StatusRecorder;
use super::retry;
use super::types::MonitorStatus;

/// Fallback re-arm delay when the monitor configuration cannot be loaded.
const CONFIG_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Handle for one monitor's recurring task. Owned exclusively by the
/// scheduler registry; dropped when the monitor is stopped or replaced.
struct ScheduledTask {
    generation: u64,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

type TaskRegistry = Arc<Mutex<HashMap<Uuid, ScheduledTask>>>;

/// Collaborators shared with every run loop.
struct RunContext {
    database: Arc<dyn Database>,
    executor: Arc<MonitoringExecutor>,
    recorder: Arc<StatusRecorder>,
    gate: Arc<NotificationGate>,
    permits: Arc<Semaphore>,
    tasks: TaskRegistry,
}

/// Owns one recurring check task per active monitor.
///
/// Each task re-arms itself with a single-shot delay after every cycle, so a
/// slow check can never overlap with the next one for the same monitor.
/// Distinct monitors run in parallel, bounded by a global permit pool.
pub struct MonitorScheduler {
    context: Arc<RunContext>,
    generation: AtomicU64,
}

impl MonitorScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        executor: Arc<MonitoringExecutor>,
        recorder: Arc<StatusRecorder>,
        gate: Arc<NotificationGate>,
        max_concurrent_checks: usize,
    ) -> Self {
        Self {
            context: Arc::new(RunContext {
                database,
                executor,
                recorder,
                gate,
                permits: Arc::new(Semaphore::new(max_concurrent_checks.max(1))),
                tasks: Arc::new(Mutex::new(HashMap::new())),
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Populate the registry from all active monitors. Called once at
    /// process start; the registry is rebuilt from the store on restart.
    pub async fn start_all(&self) {
        let monitors = match self.context.database.list_active_monitors().await {
            Ok(monitors) => monitors,
            Err(error) => {
                warn!("failed to list active monitors at startup: {error:#}");
                return;
            }
        };

        info!("scheduling {} active monitors", monitors.len());
        for monitor in monitors {
            self.schedule(monitor.id).await;
        }
    }

    /// Idempotently (re)register the recurring task for a monitor. An
    /// existing task is cancelled and replaced, which is how configuration
    /// edits take effect without a restart. A missing or inactive monitor is
    /// a logged no-op (any stale task for it is cancelled).
    pub async fn schedule(&self, monitor_id: Uuid) {
        let monitor = match self.context.database.get_monitor(monitor_id).await {
            Ok(Some(monitor)) => monitor,
            Ok(None) => {
                info!(%monitor_id, "not scheduling: monitor does not exist");
                self.stop(monitor_id).await;
                return;
            }
            Err(error) => {
                warn!(%monitor_id, "not scheduling: failed to load monitor: {error:#}");
                return;
            }
        };

        if !monitor.active {
            info!(%monitor_id, "not scheduling: monitor is inactive");
            self.stop(monitor_id).await;
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let context = Arc::clone(&self.context);

        // The registry lock is held across the replace so a concurrent
        // schedule/stop for the same monitor cannot leave two live tasks.
        // The replaced task's handle is passed on: the new loop waits it
        // out before its first probe, since the old one may be mid-cycle.
        let mut tasks = self.context.tasks.lock().await;
        let previous = tasks.remove(&monitor_id).map(|task| {
            debug!(%monitor_id, "replacing existing task");
            let _ = task.shutdown.send(());
            task.handle
        });

        let handle = tokio::spawn(run_loop(context, monitor_id, generation, previous, shutdown_rx));
        tasks.insert(monitor_id, ScheduledTask { generation, shutdown: shutdown_tx, handle });
        info!(%monitor_id, monitor = %monitor.name, "scheduled monitor");
    }

    /// Cancel the monitor's task if present; idempotent. After this returns
    /// an in-flight cycle may still finish its record/notify steps, but no
    /// further probe starts and the task will not re-arm.
    pub async fn stop(&self, monitor_id: Uuid) {
        let mut tasks = self.context.tasks.lock().await;
        if let Some(task) = tasks.remove(&monitor_id) {
            let _ = task.shutdown.send(());
            debug!(%monitor_id, "stopped monitor task");
        }
    }

    /// Number of live scheduled tasks.
    pub async fn task_count(&self) -> usize {
        self.context.tasks.lock().await.len()
    }

    /// Signal every task and wait for the in-flight cycles to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<ScheduledTask> = {
            let mut tasks = self.context.tasks.lock().await;
            tasks.drain().map(|(_, task)| task).collect()
        };

        info!("draining {} monitor tasks", drained.len());
        let mut handles = Vec::with_capacity(drained.len());
        for task in drained {
            // A task that already exited has dropped its receiver; ignore.
            let _ = task.shutdown.send(());
            handles.push(task.handle);
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// One monitor's run loop: probe, apply retry policy, record, notify, then
/// re-arm a single-shot timer. Every failure is contained here.
async fn run_loop(
    context: Arc<RunContext>,
    monitor_id: Uuid,
    generation: u64,
    previous: Option<JoinHandle<()>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // The task this one replaced may still be finishing a cycle; two
    // probes for the same monitor must never overlap.
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut consecutive_failures: u32 = 0;
    let mut gate_state: Option<GateState> = None;

    loop {
        // A stop that raced with the previous cycle must win before the
        // next probe starts.
        match shutdown_rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => {}
            _ => break,
        }

        // Never trust a stale copy: configuration edits made mid-flight
        // take effect on the next cycle.
        let monitor = match context.database.get_monitor(monitor_id).await {
            Ok(Some(monitor)) => monitor,
            Ok(None) => {
                info!(%monitor_id, "monitor no longer exists, task exiting");
                deregister(&context, monitor_id, generation).await;
                return;
            }
            Err(error) => {
                warn!(%monitor_id, "failed to load monitor configuration: {error:#}");
                if !rearm(&mut shutdown_rx, CONFIG_RETRY_DELAY).await {
                    break;
                }
                continue;
            }
        };

        if !monitor.active {
            info!(%monitor_id, "monitor deactivated, task exiting");
            deregister(&context, monitor_id, generation).await;
            return;
        }

        let state = gate_state.get_or_insert_with(|| seed_gate_state(&monitor));

        let outcome = {
            let _permit = context.permits.acquire().await.ok();
            context.executor.execute(&monitor).await
        };

        let verdict = retry::evaluate(
            outcome.status == MonitorStatus::Up,
            consecutive_failures,
            monitor.retries,
            monitor.interval(),
            monitor.retry_interval(),
        );
        consecutive_failures = verdict.consecutive_failures;
        let outcome = outcome.with_status(verdict.status);

        debug!(
            %monitor_id,
            status = outcome.status.as_str(),
            ping_ms = outcome.ping_ms,
            "{}",
            outcome.message
        );

        context.recorder.record(&outcome).await;

        let now = SystemTime::now();
        if let Some(transition) = decide(state, outcome.status, monitor.resend_interval(), now) {
            context.gate.dispatch(&monitor, transition, &outcome).await;
            state.last_notified_at = Some(now);
        }
        if outcome.status != MonitorStatus::Pending {
            state.last_reported = Some(outcome.status);
        }

        if !rearm(&mut shutdown_rx, verdict.next_delay).await {
            break;
        }
    }

    debug!(%monitor_id, "monitor task finished");
}

/// Sleep until the next cycle; returns false when shutdown wins the race.
async fn rearm(shutdown_rx: &mut oneshot::Receiver<()>, delay: Duration) -> bool {
    tokio::select! {
        biased;

        _ = &mut *shutdown_rx => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Seed transition detection from the cached status so a restart does not
/// re-fire notifications for an unchanged state.
fn seed_gate_state(monitor: &Monitor) -> GateState {
    GateState {
        last_reported: monitor.last_status.filter(|status| *status != MonitorStatus::Pending),
        last_notified_at: None,
    }
}

/// Remove our own registry entry, unless a newer task replaced it already.
async fn deregister(context: &RunContext, monitor_id: Uuid, generation: u64) {
    let mut tasks = context.tasks.lock().await;
    if tasks.get(&monitor_id).map(|task| task.generation) == Some(generation) {
        tasks.remove(&monitor_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseImpl, initialize_database};
    use crate::models::monitor::{ProbeConfig, PushSettings};
    use crate::monitoring::notifier::NotificationGate;
    use crate::pool::create_pool;

    async fn test_scheduler(dir: &tempfile::TempDir) -> (MonitorScheduler, Arc<dyn Database>) {
        let pool = create_pool(dir.path().join("test.db")).await.unwrap();
        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));
        let executor = Arc::new(MonitoringExecutor::new(Arc::clone(&database)));
        let recorder = Arc::new(StatusRecorder::new(Arc::clone(&database)));
        let gate = Arc::new(NotificationGate::new(None));
        let scheduler =
            MonitorScheduler::new(Arc::clone(&database), executor, recorder, gate, 8);
        (scheduler, database)
    }

    fn push_monitor(name: &str, interval_seconds: u64) -> Monitor {
        let mut monitor = Monitor::new(
            name,
            ProbeConfig::Push(PushSettings {
                token: format!("{name}-token"),
                grace_seconds: 0,
            }),
        );
        monitor.interval_seconds = interval_seconds;
        monitor
    }

    #[tokio::test]
    async fn schedule_twice_leaves_one_task() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, database) = test_scheduler(&dir).await;

        let monitor = push_monitor("dup", 60);
        database.save_monitor(&monitor).await.unwrap();

        scheduler.schedule(monitor.id).await;
        scheduler.schedule(monitor.id).await;
        assert_eq!(scheduler.task_count().await, 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_prevents_further_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, database) = test_scheduler(&dir).await;

        let monitor = push_monitor("stoppable", 1);
        database.save_monitor(&monitor).await.unwrap();

        scheduler.schedule(monitor.id).await;
        // Let the immediate first cycle record its outcome.
        tokio::time::sleep(Duration::from_millis(400)).await;

        scheduler.stop(monitor.id).await;
        scheduler.stop(monitor.id).await;
        assert_eq!(scheduler.task_count().await, 0);

        let recorded = database.get_recent_records(monitor.id, 100).await.unwrap().len();
        assert!(recorded >= 1);

        // The 1s interval would fire again by now if the task were alive.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let after = database.get_recent_records(monitor.id, 100).await.unwrap().len();
        assert_eq!(after, recorded);
    }

    #[tokio::test]
    async fn replacement_task_waits_for_the_previous_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, database) = test_scheduler(&dir).await;

        let monitor = push_monitor("replace", 60);
        database.save_monitor(&monitor).await.unwrap();

        // Stand in for a replaced task still finishing a slow probe.
        let previous = tokio::spawn(tokio::time::sleep(Duration::from_millis(800)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let context = Arc::clone(&scheduler.context);
        let handle = tokio::spawn(run_loop(context, monitor.id, 0, Some(previous), shutdown_rx));

        // While the old cycle is in flight the new task must not probe.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(database.get_recent_records(monitor.id, 10).await.unwrap().is_empty());

        // Once it finishes, the first check goes through.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!database.get_recent_records(monitor.id, 10).await.unwrap().is_empty());

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }

    #[tokio::test]
    async fn inactive_monitor_is_not_scheduled() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, database) = test_scheduler(&dir).await;

        let mut monitor = push_monitor("inactive", 60);
        monitor.active = false;
        database.save_monitor(&monitor).await.unwrap();

        scheduler.schedule(monitor.id).await;
        assert_eq!(scheduler.task_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_monitor_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _) = test_scheduler(&dir).await;

        scheduler.schedule(Uuid::new_v4()).await;
        assert_eq!(scheduler.task_count().await, 0);
    }

    #[tokio::test]
    async fn check_outcome_updates_cached_status_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, database) = test_scheduler(&dir).await;

        // No heartbeat was ever recorded, so the push probe confirms down
        // immediately (retries = 0).
        let monitor = push_monitor("cached", 60);
        database.save_monitor(&monitor).await.unwrap();

        scheduler.schedule(monitor.id).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.shutdown().await;

        let stored = database.get_monitor(monitor.id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(MonitorStatus::Down));
        assert!(stored.last_check_at.is_some());

        let records = database.get_recent_records(monitor.id, 10).await.unwrap();
        assert_eq!(records.first().map(|r| r.status), Some(MonitorStatus::Down));
    }
}
