use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::models::monitor::Monitor;

use super::types::{CheckOutcome, MonitorStatus};

/// Kind of state transition a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First confirmed down after being up (or never having reported)
    Down,
    /// Recovery after a reported down
    Up,
    /// Repeated reminder while the monitor stays down
    StillDown,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Down => "down",
            Transition::Up => "up",
            Transition::StillDown => "still-down",
        }
    }
}

/// Per-monitor state the gate decides against. Owned by the run loop.
#[derive(Debug, Clone, Default)]
pub struct GateState {
    /// Last status reported to the outside world (never `Pending`)
    pub last_reported: Option<MonitorStatus>,
    /// When the last notification for the current down streak went out
    pub last_notified_at: Option<SystemTime>,
}

/// Decide whether the new confirmed status warrants a notification.
///
/// Pending never notifies. A confirmed down fires once on the transition and
/// then again every `resend_interval` while the monitor stays down
/// (`resend_interval` of zero stays silent until recovery). Recovery fires
/// only if a down was previously reported.
pub fn decide(
    state: &GateState,
    new_status: MonitorStatus,
    resend_interval: Duration,
    now: SystemTime,
) -> Option<Transition> {
    match new_status {
        MonitorStatus::Pending => None,
        MonitorStatus::Down => {
            if state.last_reported != Some(MonitorStatus::Down) {
                return Some(Transition::Down);
            }
            if resend_interval.is_zero() {
                return None;
            }
            let elapsed = state
                .last_notified_at
                .and_then(|at| now.duration_since(at).ok())
                .unwrap_or(Duration::MAX);
            (elapsed >= resend_interval).then_some(Transition::StillDown)
        }
        MonitorStatus::Up => {
            (state.last_reported == Some(MonitorStatus::Down)).then_some(Transition::Up)
        }
    }
}

/// Notification channel consumed by the gate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        monitor: &Monitor,
        transition: Transition,
        outcome: &CheckOutcome,
    ) -> Result<()>;
}

/// Fires notifications on state transitions; failures are logged and never
/// affect scheduling or recording.
pub struct NotificationGate {
    channel: Option<Arc<dyn Notifier>>,
}

impl NotificationGate {
    pub fn new(channel: Option<Arc<dyn Notifier>>) -> Self {
        Self { channel }
    }

    pub async fn dispatch(&self, monitor: &Monitor, transition: Transition, outcome: &CheckOutcome) {
        let Some(channel) = &self.channel else {
            return;
        };
        if let Err(error) = channel.notify(monitor, transition, outcome).await {
            warn!(
                monitor_id = %monitor.id,
                transition = transition.as_str(),
                "notification failed: {error:#}"
            );
        }
    }
}

/// Webhook channel posting a JSON payload describing the transition.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        monitor: &Monitor,
        transition: Transition,
        outcome: &CheckOutcome,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "monitor_id": monitor.id,
            "monitor": monitor.name,
            "event": transition.as_str(),
            "status": outcome.status.as_str(),
            "message": outcome.message,
            "ping_ms": outcome.ping_ms,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.client.post(&self.url).json(&payload).send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESEND: Duration = Duration::from_secs(300);
    const EPOCH: SystemTime = SystemTime::UNIX_EPOCH;

    fn at(seconds: u64) -> SystemTime {
        EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn pending_never_notifies() {
        let state = GateState { last_reported: Some(MonitorStatus::Up), last_notified_at: None };
        assert_eq!(decide(&state, MonitorStatus::Pending, RESEND, at(0)), None);
    }

    #[test]
    fn down_fires_once_then_stays_silent_without_resend() {
        let mut state = GateState::default();
        assert_eq!(
            decide(&state, MonitorStatus::Down, Duration::ZERO, at(0)),
            Some(Transition::Down)
        );
        state.last_reported = Some(MonitorStatus::Down);
        state.last_notified_at = Some(at(0));

        assert_eq!(decide(&state, MonitorStatus::Down, Duration::ZERO, at(600)), None);
    }

    #[test]
    fn recovery_fires_only_after_reported_down() {
        let up_state = GateState { last_reported: Some(MonitorStatus::Up), last_notified_at: None };
        assert_eq!(decide(&up_state, MonitorStatus::Up, RESEND, at(0)), None);

        let down_state =
            GateState { last_reported: Some(MonitorStatus::Down), last_notified_at: Some(at(0)) };
        assert_eq!(decide(&down_state, MonitorStatus::Up, RESEND, at(60)), Some(Transition::Up));
    }

    #[test]
    fn resend_cadence_over_a_long_outage() {
        // Down at t=0, checked every 60s for 1000s with resend_interval=300:
        // expect the initial down plus resends at ~300, ~600 and ~900.
        let mut state = GateState::default();
        let mut notifications = Vec::new();

        for t in (0..=1000).step_by(60) {
            let now = at(t);
            if let Some(transition) = decide(&state, MonitorStatus::Down, RESEND, now) {
                notifications.push((t, transition));
                state.last_notified_at = Some(now);
            }
            state.last_reported = Some(MonitorStatus::Down);
        }

        assert_eq!(notifications.first(), Some(&(0, Transition::Down)));
        let resends: Vec<u64> = notifications
            .iter()
            .filter(|(_, tr)| *tr == Transition::StillDown)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(resends, vec![300, 600, 900]);
    }
}
