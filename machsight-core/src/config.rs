//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/machsight/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/machsight/` (~/.config/machsight/)
//! - State/Logs: `$XDG_STATE_HOME/machsight/` (~/.local/state/machsight/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Backend server connection
    #[serde(default)]
    pub server: ServerConfig,

    /// Local backend process management
    #[serde(default)]
    pub backend: BackendConfig,

    /// Periodic data refresh
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend server connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the monitoring backend's REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Local backend process configuration
///
/// When `autostart` is set (the default) and no backend answers the pre-check
/// probe, machsight spawns the backend itself and supervises it for the
/// lifetime of the session.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Spawn the backend locally if it is not already reachable
    #[serde(default = "default_autostart")]
    pub autostart: bool,

    /// Backend executable. Defaults to `<backend dir>/venv/bin/python`.
    pub executable: Option<PathBuf>,

    /// Arguments passed to the executable
    #[serde(default = "default_backend_args")]
    pub args: Vec<String>,

    /// Working directory for the backend process.
    /// Defaults to the `backend` directory next to the install directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            autostart: default_autostart(),
            executable: None,
            args: default_backend_args(),
            working_dir: None,
        }
    }
}

fn default_autostart() -> bool {
    true
}

fn default_backend_args() -> Vec<String> {
    vec!["api/main.py".to_string()]
}

/// Periodic refresh configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Enable the auto-refresh timer at startup
    #[serde(default)]
    pub auto_refresh: bool,

    /// Seconds between refresh ticks
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            interval_secs: default_refresh_interval(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            return Err(Error::Config("server.base_url must not be empty".to_string()));
        }
        if self.refresh.interval_secs == 0 {
            return Err(Error::Config(
                "refresh.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/machsight/config.toml` (~/.config/machsight/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("machsight").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/machsight/` (~/.local/state/machsight/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("machsight")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/machsight/machsight.log` (~/.local/state/machsight/machsight.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("machsight.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert!(config.backend.autostart);
        assert!(!config.refresh.auto_refresh);
        assert_eq!(config.refresh.interval_secs, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
base_url = "http://monitor.local:9000"

[backend]
autostart = false

[refresh]
auto_refresh = true
interval_secs = 10

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.server.base_url, "http://monitor.local:9000");
        assert!(!config.backend.autostart);
        assert!(config.refresh.auto_refresh);
        assert_eq!(config.refresh.interval_secs, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_rejects_empty_base_url() {
        let toml = r#"
[server]
base_url = "  "
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let toml = r#"
[refresh]
interval_secs = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nbase_url = \"http://example:8000\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.base_url, "http://example:8000");
    }
}
