//! Structural validation of monitor definitions before they are persisted.

use anyhow::{Result, anyhow};
use url::Url;

use crate::models::monitor::{HttpSettings, Monitor, ProbeConfig};
use crate::monitoring::checker::parse_status_ranges;

const MIN_INTERVAL: u64 = 1;
const MAX_INTERVAL: u64 = 86_400; // 24 hours
const MIN_TIMEOUT: u64 = 1;
const MAX_TIMEOUT: u64 = 300; // 5 minutes

/// Validate a monitor definition
pub fn validate_monitor(monitor: &Monitor) -> Result<()> {
    if monitor.name.trim().is_empty() {
        return Err(anyhow!("monitor name must not be empty"));
    }
    validate_check_interval(monitor.interval_seconds)?;
    validate_timeout(monitor.timeout_seconds)?;

    match &monitor.probe {
        ProbeConfig::Http(http) => validate_http_settings(http),
        ProbeConfig::Keyword(settings) => {
            validate_http_settings(&settings.http)?;
            if settings.keyword.is_empty() {
                return Err(anyhow!("keyword must not be empty"));
            }
            Ok(())
        }
        ProbeConfig::HttpsCert(settings) => {
            validate_http_settings(&settings.http)?;
            let url = Url::parse(&settings.http.url)?;
            if url.scheme() != "https" {
                return Err(anyhow!("certificate monitors require an https URL"));
            }
            Ok(())
        }
        ProbeConfig::Port(settings) => {
            if settings.hostname.trim().is_empty() {
                return Err(anyhow!("hostname must not be empty"));
            }
            validate_port(settings.port)
        }
        ProbeConfig::Mysql(settings) => {
            validate_connection_string(&settings.connection_string, "mysql")
        }
        ProbeConfig::Redis(settings) => {
            validate_connection_string(&settings.connection_string, "redis")
        }
        ProbeConfig::Icmp(settings) => {
            if settings.hostname.trim().is_empty() {
                return Err(anyhow!("hostname must not be empty"));
            }
            if settings.packet_count == 0 {
                return Err(anyhow!("packet count must be at least 1"));
            }
            if !(0.0..=100.0).contains(&settings.max_packet_loss) {
                return Err(anyhow!("max packet loss must be between 0 and 100 percent"));
            }
            Ok(())
        }
        ProbeConfig::Push(settings) => {
            if settings.token.trim().is_empty() {
                return Err(anyhow!("push token must not be empty"));
            }
            Ok(())
        }
    }
}

/// Validate HTTP settings shared by http/keyword/https-cert monitors
fn validate_http_settings(settings: &HttpSettings) -> Result<()> {
    let url = Url::parse(&settings.url).map_err(|e| anyhow!("invalid URL: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("invalid scheme for HTTP monitor: {other}")),
    }

    if let Some(port) = url.port() {
        validate_port(port)?;
    }

    parse_status_ranges(&settings.accepted_statuscodes)?;
    Ok(())
}

fn validate_connection_string(connection_string: &str, expected_scheme: &str) -> Result<()> {
    let url = Url::parse(connection_string).map_err(|e| anyhow!("invalid connection string: {e}"))?;
    if url.scheme() != expected_scheme {
        return Err(anyhow!(
            "connection string must use the {expected_scheme}:// scheme, got {}",
            url.scheme()
        ));
    }
    if url.host_str().is_none() {
        return Err(anyhow!("connection string has no host"));
    }
    Ok(())
}

fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(anyhow!("port 0 is not valid"));
    }
    Ok(())
}

/// Validate check interval bounds
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    if interval_seconds < MIN_INTERVAL {
        return Err(anyhow!(
            "check interval too short: {interval_seconds} seconds (minimum: {MIN_INTERVAL})"
        ));
    }
    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "check interval too long: {interval_seconds} seconds (maximum: {MAX_INTERVAL})"
        ));
    }
    Ok(())
}

/// Validate timeout bounds
pub fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "timeout too short: {timeout_seconds} seconds (minimum: {MIN_TIMEOUT})"
        ));
    }
    if timeout_seconds > MAX_TIMEOUT {
        return Err(anyhow!(
            "timeout too long: {timeout_seconds} seconds (maximum: {MAX_TIMEOUT})"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::monitor::{
        DatabaseSettings, IcmpSettings, PortSettings, PushSettings,
    };

    fn monitor_with(probe: ProbeConfig) -> Monitor {
        Monitor::new("test", probe)
    }

    fn http_settings(url: &str) -> HttpSettings {
        let ProbeConfig::Http(mut settings) =
            serde_json::from_str::<ProbeConfig>(&format!(r#"{{"type":"http","url":"{url}"}}"#))
                .unwrap()
        else {
            unreachable!()
        };
        settings.url = url.to_string();
        settings
    }

    #[test]
    fn accepts_plain_http_monitors() {
        let monitor = monitor_with(ProbeConfig::Http(http_settings("https://example.com")));
        assert!(validate_monitor(&monitor).is_ok());
    }

    #[test]
    fn rejects_bad_schemes_and_status_patterns() {
        let monitor = monitor_with(ProbeConfig::Http(http_settings("ftp://example.com")));
        assert!(validate_monitor(&monitor).is_err());

        let mut settings = http_settings("https://example.com");
        settings.accepted_statuscodes = vec!["2xx".to_string()];
        assert!(validate_monitor(&monitor_with(ProbeConfig::Http(settings))).is_err());
    }

    #[test]
    fn rejects_interval_and_timeout_out_of_bounds() {
        let mut monitor =
            monitor_with(ProbeConfig::Port(PortSettings { hostname: "h".to_string(), port: 80 }));
        monitor.interval_seconds = 0;
        assert!(validate_monitor(&monitor).is_err());

        monitor.interval_seconds = 60;
        monitor.timeout_seconds = 301;
        assert!(validate_monitor(&monitor).is_err());
    }

    #[test]
    fn rejects_port_zero() {
        let monitor =
            monitor_with(ProbeConfig::Port(PortSettings { hostname: "h".to_string(), port: 0 }));
        assert!(validate_monitor(&monitor).is_err());
    }

    #[test]
    fn connection_strings_must_match_scheme() {
        let good = monitor_with(ProbeConfig::Mysql(DatabaseSettings {
            connection_string: "mysql://user:pw@db:3306/app".to_string(),
            query: None,
        }));
        assert!(validate_monitor(&good).is_ok());

        let bad = monitor_with(ProbeConfig::Redis(DatabaseSettings {
            connection_string: "mysql://user:pw@db:3306/app".to_string(),
            query: None,
        }));
        assert!(validate_monitor(&bad).is_err());
    }

    #[test]
    fn icmp_bounds_and_push_token() {
        let bad_loss = monitor_with(ProbeConfig::Icmp(IcmpSettings {
            hostname: "example.com".to_string(),
            packet_count: 4,
            max_packet_loss: 150.0,
        }));
        assert!(validate_monitor(&bad_loss).is_err());

        let empty_token = monitor_with(ProbeConfig::Push(PushSettings {
            token: "  ".to_string(),
            grace_seconds: 60,
        }));
        assert!(validate_monitor(&empty_token).is_err());
    }
}
