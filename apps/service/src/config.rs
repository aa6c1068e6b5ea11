use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file")]
    ReadFailed,
    #[error("failed to write config file")]
    WriteFailed,
    #[error("failed to parse config file")]
    ParseFailed,
    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global cap on probes running at the same time
    pub max_concurrent_checks: usize,
    /// Days of status history kept before pruning
    pub retention_days: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// JSON payloads are POSTed here on state transitions when set
    pub webhook_url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "upcheck.db".into() }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent_checks: 64, retention_days: 30 }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 3001 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            push: PushConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/upcheck/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("upcheck/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Internal Configuration State:")?;
        writeln!(f, "  Database")?;
        writeln!(f, "    Path: {}", self.database.path)?;
        writeln!(f, "  Scheduler")?;
        writeln!(f, "    Max Concurrent Checks: {}", self.scheduler.max_concurrent_checks)?;
        writeln!(f, "    Retention Days: {}", self.scheduler.retention_days)?;
        writeln!(f, "  Push Listener")?;
        writeln!(f, "    Bind Address: {}", self.push.bind)?;
        writeln!(f, "    Port: {}", self.push.port)?;
        writeln!(
            f,
            "  Notifications\n    Webhook: {}",
            self.notifications.webhook_url.as_deref().unwrap_or("(disabled)")
        )?;
        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/upcheck/config.toml
    /// or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(|_err| Error::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|_err| Error::ParseFailed)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|_err| Error::ParseFailed)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_err| Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(|_err| Error::WriteFailed)
    }
}
