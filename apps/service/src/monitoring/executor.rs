use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;

use crate::database::Database;
use crate::models::monitor::{Monitor, ProbeConfig};

use super::checker::{
    HttpProber, MysqlProber, PingProber, ProbeReport, Prober, PushProber, RedisProber, TcpProber,
};
use super::types::{CheckOutcome, MonitorStatus};

/// Extra time granted beyond the per-probe timeout before the executor
/// forcibly abandons a runner.
const HARD_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Runs the type-specific probe for a monitor and turns the raw result into
/// a `CheckOutcome`. Probe errors are outcomes, never faults.
pub struct MonitoringExecutor {
    http: HttpProber,
    tcp: TcpProber,
    ping: PingProber,
    mysql: MysqlProber,
    redis: RedisProber,
    push: PushProber,
}

impl MonitoringExecutor {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            http: HttpProber::new(),
            tcp: TcpProber,
            ping: PingProber,
            mysql: MysqlProber,
            redis: RedisProber,
            push: PushProber::new(database),
        }
    }

    /// Execute one check cycle for the monitor.
    pub async fn execute(&self, monitor: &Monitor) -> CheckOutcome {
        let prober: &dyn Prober = match &monitor.probe {
            ProbeConfig::Http(_) | ProbeConfig::Keyword(_) | ProbeConfig::HttpsCert(_) => {
                &self.http
            }
            ProbeConfig::Port(_) => &self.tcp,
            ProbeConfig::Icmp(_) => &self.ping,
            ProbeConfig::Mysql(_) => &self.mysql,
            ProbeConfig::Redis(_) => &self.redis,
            ProbeConfig::Push(_) => &self.push,
        };

        // Probers enforce the configured timeout themselves; this outer
        // timeout is the backstop that keeps a stuck runner from wedging
        // the monitor's task.
        let hard_timeout = monitor.timeout() + HARD_TIMEOUT_SLACK;
        let raw = match tokio::time::timeout(hard_timeout, prober.probe(monitor)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "probe exceeded the {}s timeout",
                monitor.timeout().as_secs()
            )),
        };

        classify(monitor, raw)
    }
}

/// Apply upside-down inversion to the raw probe result and assemble the
/// outcome. The retry machinery downstream is unaware of the inversion.
pub fn classify(monitor: &Monitor, raw: Result<ProbeReport>) -> CheckOutcome {
    let (raw_up, message, ping_ms, details) = match raw {
        Ok(report) => (true, report.message, report.ping_ms, report.details),
        Err(error) => (false, format!("{error:#}"), None, None),
    };

    let up = raw_up != monitor.upside_down;
    let status = if up { MonitorStatus::Up } else { MonitorStatus::Down };

    let message = if monitor.upside_down && up {
        format!("up (upside down): {message}")
    } else {
        message
    };

    let mut outcome = CheckOutcome::new(monitor.id, status, message);
    if let Some(ping_ms) = ping_ms {
        outcome = outcome.with_ping(ping_ms);
    }
    if let Some(details) = details {
        outcome = outcome.with_details(details);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::monitor::{PortSettings, ProbeConfig};

    fn port_monitor(upside_down: bool) -> Monitor {
        let mut monitor = Monitor::new(
            "port check",
            ProbeConfig::Port(PortSettings { hostname: "example.com".to_string(), port: 443 }),
        );
        monitor.upside_down = upside_down;
        monitor
    }

    #[test]
    fn classify_maps_success_to_up() {
        let monitor = port_monitor(false);
        let report = ProbeReport::default();
        let outcome = classify(&monitor, Ok(report));
        assert_eq!(outcome.status, MonitorStatus::Up);
    }

    #[test]
    fn classify_maps_failure_to_down_with_message() {
        let monitor = port_monitor(false);
        let outcome = classify(&monitor, Err(anyhow!("connection refused")));
        assert_eq!(outcome.status, MonitorStatus::Down);
        assert!(outcome.message.contains("connection refused"));
    }

    #[test]
    fn upside_down_inverts_the_final_classification_only() {
        let monitor = port_monitor(true);

        let outcome = classify(&monitor, Ok(ProbeReport::default()));
        assert_eq!(outcome.status, MonitorStatus::Down);

        let outcome = classify(&monitor, Err(anyhow!("connection refused")));
        assert_eq!(outcome.status, MonitorStatus::Up);
    }
}
