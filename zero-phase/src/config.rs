//! Phase manager configuration.
//!
//! Defaults are plain factory functions; [`PhaseManagerConfig::from_config`]
//! overlays the optional `phase` section of the shared config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use zero_common::config::Config;
use zero_common::validation::Validate;

use crate::adapter::StrategyAdapterConfig;
use crate::detector::PhaseDetectorConfig;
use crate::types::{PhaseError, Result};

fn default_check_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for [`crate::PhaseManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseManagerConfig {
    pub detector: PhaseDetectorConfig,
    pub strategy: StrategyAdapterConfig,
    /// Period of the background phase check
    pub check_interval: Duration,
    /// Upper bound on how long `stop()` waits for the loop to exit
    pub shutdown_timeout: Duration,
}

impl Default for PhaseManagerConfig {
    fn default() -> Self {
        Self {
            detector: PhaseDetectorConfig::default(),
            strategy: StrategyAdapterConfig::default(),
            check_interval: default_check_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl PhaseManagerConfig {
    /// Build from the shared config, falling back to defaults per field.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut out = Self::default();
        let Some(phase) = config.phase.as_ref() else {
            return Ok(out);
        };
        phase
            .validate()
            .map_err(|e| PhaseError::InvalidConfig(e.to_string()))?;

        let thresholds = &mut out.detector.thresholds;
        if let Some(v) = phase.bootstrap_max {
            thresholds.bootstrap_max = v;
        }
        if let Some(v) = phase.growth_max {
            thresholds.growth_max = v;
        }
        if let Some(v) = phase.scale_max {
            thresholds.scale_max = v;
        }
        if let Some(pct) = phase.hysteresis_pct {
            out.detector.hysteresis = pct / 100.0;
        }
        if let Some(secs) = phase.min_phase_duration_secs {
            out.detector.min_phase_duration = Duration::from_secs(secs);
        }
        if let Some(enabled) = phase.persistence_enabled {
            out.detector.persistence_enabled = enabled;
        }
        if let Some(secs) = phase.check_interval_secs {
            out.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = phase.shutdown_timeout_secs {
            out.shutdown_timeout = Duration::from_secs(secs);
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        if self.check_interval.is_zero() {
            return Err(PhaseError::InvalidConfig(
                "check_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
