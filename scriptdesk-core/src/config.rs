//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/scriptdesk/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/scriptdesk/` (~/.config/scriptdesk/)
//! - State/Logs: `$XDG_STATE_HOME/scriptdesk/` (~/.local/state/scriptdesk/)
//!
//! User preferences (model, target, artifact kind) live next to the config
//! file in `preferences.toml` and are handled by [`crate::preferences`].

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `backend.api_key`
pub const API_KEY_ENV: &str = "SCRIPTDESK_API_KEY";

/// Environment variable overriding `backend.device_password`
pub const DEVICE_PASSWORD_ENV: &str = "SCRIPTDESK_DEVICE_PASSWORD";

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
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Assistant backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Execution classification and options
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Assistant backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Base URL of the backend, without the `/api` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Credential forwarded to the model provider (can also use env var)
    pub api_key: Option<String>,

    /// Deadline for every remote action, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for executions on a network device, in seconds
    #[serde(default = "default_device_timeout_secs")]
    pub device_timeout_secs: u64,

    /// SSH password for the network device (can also use env var)
    pub device_password: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            device_timeout_secs: default_device_timeout_secs(),
            device_password: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_device_timeout_secs() -> u64 {
    120
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }

    /// API key from the environment, falling back to the config file
    pub fn resolved_api_key(&self) -> Option<String> {
        env_non_empty(API_KEY_ENV).or_else(|| self.api_key.clone().filter(|k| !k.is_empty()))
    }

    /// Device password from the environment, falling back to the config file
    pub fn resolved_device_password(&self) -> Option<String> {
        env_non_empty(DEVICE_PASSWORD_ENV).or_else(|| self.device_password.clone())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "backend.base_url must start with http:// or https://, got {:?}",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "backend.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.device_timeout_secs == 0 {
            return Err(Error::Config(
                "backend.device_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Execution configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Lowercase substrings that make clean-exit output look like an error
    #[serde(default = "default_error_keywords")]
    pub error_keywords: Vec<String>,

    /// Ask the backend to run local artifacts with elevated privileges
    #[serde(default)]
    pub run_elevated: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            error_keywords: default_error_keywords(),
            run_elevated: false,
        }
    }
}

/// Built-in error keywords
pub fn default_error_keywords() -> Vec<String> {
    [
        "error",
        "fail",
        "cannot",
        "unable",
        "traceback",
        "exception",
        "not found",
        "invalid",
        "command parse error",
        "command_cli_error",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
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
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/scriptdesk/config.toml` (~/.config/scriptdesk/config.toml)
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// `$XDG_CONFIG_HOME/scriptdesk/` (~/.config/scriptdesk/)
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("scriptdesk")
    }

    /// Returns the preferences file path
    ///
    /// `$XDG_CONFIG_HOME/scriptdesk/preferences.toml`
    pub fn preferences_path() -> PathBuf {
        Self::config_dir().join("preferences.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/scriptdesk/` (~/.local/state/scriptdesk/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("scriptdesk")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/scriptdesk/scriptdesk.log` (~/.local/state/scriptdesk/scriptdesk.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("scriptdesk.log")
    }
}
