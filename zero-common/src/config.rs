//! Configuration management for Zero services.
//!
//! All Zero services share a unified configuration file at `~/.codecoder/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZERO_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Observability
//! - `ZERO_LOG_LEVEL` → observability.log_level
//! - `ZERO_LOG_FORMAT` → observability.log_format
//!
//! ## Phase management
//! - `ZERO_PHASE_CHECK_INTERVAL_SECS` → phase.check_interval_secs
//! - `ZERO_PHASE_HYSTERESIS_PCT` → phase.hysteresis_pct
//! - `ZERO_PHASE_MIN_DURATION_SECS` → phase.min_phase_duration_secs
//! - `ZERO_PHASE_PERSISTENCE` → phase.persistence_enabled

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ResultExt};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codecoder"),
            |dirs| dirs.home_dir().join(".codecoder"),
        )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Unified configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Portfolio phase management (optional)
    #[serde(default)]
    pub phase: Option<PhaseConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str::<Self>(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("ZERO_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        let interval = lookup("ZERO_PHASE_CHECK_INTERVAL_SECS").and_then(|v| v.parse().ok());
        let hysteresis = lookup("ZERO_PHASE_HYSTERESIS_PCT").and_then(|v| v.parse().ok());
        let min_duration = lookup("ZERO_PHASE_MIN_DURATION_SECS").and_then(|v| v.parse().ok());
        let persistence = lookup("ZERO_PHASE_PERSISTENCE").and_then(|v| parse_bool(&v));

        if interval.is_none() && hysteresis.is_none() && min_duration.is_none() && persistence.is_none()
        {
            return;
        }

        let phase = self.phase.get_or_insert_with(PhaseConfig::default);
        if interval.is_some() {
            phase.check_interval_secs = interval;
        }
        if hysteresis.is_some() {
            phase.hysteresis_pct = hysteresis;
        }
        if min_duration.is_some() {
            phase.min_phase_duration_secs = min_duration;
        }
        if persistence.is_some() {
            phase.persistence_enabled = persistence;
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Aliases: "level" for backward compatibility with existing config files
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    /// Aliases: "format" for backward compatibility with existing config files
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to exclude from logging.
    ///
    /// These modules will be set to `warn` level to reduce noise.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Phase Configuration
// ============================================================================

/// Portfolio phase management settings.
///
/// Every field is optional; unset fields keep the phase manager's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Upper bound of the bootstrap phase (default 10,000)
    #[serde(default)]
    pub bootstrap_max: Option<f64>,

    /// Upper bound of the growth phase (default 50,000)
    #[serde(default)]
    pub growth_max: Option<f64>,

    /// Upper bound of the scale phase (default 200,000)
    #[serde(default)]
    pub scale_max: Option<f64>,

    /// Hysteresis band as a percentage (default 5)
    #[serde(default)]
    pub hysteresis_pct: Option<f64>,

    /// Minimum dwell time in a phase, seconds (default 86400)
    #[serde(default)]
    pub min_phase_duration_secs: Option<u64>,

    /// Background check interval, seconds (default 300)
    #[serde(default)]
    pub check_interval_secs: Option<u64>,

    /// Save/load detector state through the configured store
    #[serde(default)]
    pub persistence_enabled: Option<bool>,

    /// Maximum wait for the check loop on shutdown, seconds (default 30)
    #[serde(default)]
    pub shutdown_timeout_secs: Option<u64>,
}
