//! Configuration management for waylink-probe.
//!
//! Uses figment to merge configuration from multiple sources:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables
//! 4. Command-line arguments

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix for configuration keys
pub const ENV_PREFIX: &str = "WAYLINK_PROBE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Socket name or path; falls back to WAYLAND_SOCKET / WAYLAND_DISPLAY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deadline for each server round-trip in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: None,
            log_level: default_log_level(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        } else if let Some(path) = default_config_path().filter(|p| p.exists()) {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        figment.extract()
    }

    /// Override display from CLI
    pub fn with_display(mut self, display: Option<String>) -> Self {
        if let Some(d) = display {
            self.display = Some(d);
        }
        self
    }

    /// Override log level from CLI
    pub fn with_log_level(mut self, log_level: Option<String>) -> Self {
        if let Some(level) = log_level {
            self.log_level = level;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `$XDG_CONFIG_HOME/waylink/probe.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("waylink").join("probe.toml"))
}

/// Whether a `WAYLAND_DEBUG` value asks for the client wire log.
pub fn wire_debug_requested(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "client"))
}

/// Default filter directives for the configured level.
pub fn log_directives(level: &str, wire_debug: bool) -> String {
    if wire_debug {
        format!("{level},waylink=trace")
    } else {
        level.to_string()
    }
}
