/*!
 * Runtime settings for the remote listing tool
 */

use crate::catalog::RestCatalog;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the control-plane address
pub const ENV_GATEWAY_ADDRESS: &str = "GATEWAY_ADDRESS";
/// Older name of [`ENV_GATEWAY_ADDRESS`], read when the new one is unset
pub const ENV_WAARP_GATEWAY_ADDRESS: &str = "WAARP_GATEWAY_ADDRESS";
/// Environment variable disabling control-plane certificate checks
pub const ENV_GATEWAY_INSECURE: &str = "GATEWAY_INSECURE";

/// Settings shared by every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Control-plane base URL; may carry `user:password@`
    #[serde(default)]
    pub gateway_address: Option<String>,

    /// Skip TLS certificate verification on control-plane calls
    #[serde(default)]
    pub insecure: bool,

    /// Per-request timeout for control-plane calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for debug logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_address: None,
            insecure: false,
            request_timeout_secs: default_request_timeout(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

fn default_request_timeout() -> u64 {
    5
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            GatewayError::Config(format!("invalid settings file {}: {}", path.display(), e))
        })
    }

    /// Override settings from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override settings from an environment lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = [ENV_GATEWAY_ADDRESS, ENV_WAARP_GATEWAY_ADDRESS]
            .into_iter()
            .find_map(|key| lookup(key).filter(|a| !a.is_empty()));
        if let Some(address) = address {
            self.gateway_address = Some(address);
        }
        if let Some(raw) = lookup(ENV_GATEWAY_INSECURE) {
            self.insecure = parse_flag(&raw).ok_or_else(|| {
                GatewayError::Config(format!("invalid {} value '{}'", ENV_GATEWAY_INSECURE, raw))
            })?;
        }
        Ok(())
    }

    /// The control-plane address, which must be set
    pub fn gateway_address(&self) -> Result<&str> {
        self.gateway_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                GatewayError::Config(format!(
                    "no gateway address given (use --gateway or {})",
                    ENV_GATEWAY_ADDRESS
                ))
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// REST catalog for the configured control plane
    pub fn catalog(&self) -> Result<RestCatalog> {
        let address = self.gateway_address()?;
        RestCatalog::with_timeout(address, self.insecure, self.request_timeout())
            .map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Effective tracing level
    pub fn effective_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else {
            self.log_level.to_tracing_level()
        }
    }
}
