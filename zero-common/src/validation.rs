//! Configuration validation for Zero services.
//!
//! Checks configuration fields before any service consumes them so a
//! bad config file fails at startup instead of mid-run.

use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, PhaseConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if let Some(phase) = &self.phase {
            if let Err(e) = phase.validate() {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply environment overrides, and validate configuration.
    pub fn load_and_validate() -> crate::Result<Self> {
        Self::load_with_env()?.validated()
    }

    /// Return the configuration if it passes validation.
    pub fn validated(self) -> crate::Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for PhaseConfig {
    fn validate(&self) -> ValidationResult<()> {
        let bounds = [
            ("phase.bootstrap_max", self.bootstrap_max),
            ("phase.growth_max", self.growth_max),
            ("phase.scale_max", self.scale_max),
        ];
        for (field, value) in bounds {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(ValidationError::InvalidValue {
                        field: field.into(),
                        reason: format!("must be a positive number, got {}", v),
                    });
                }
            }
        }

        // Only the pairs that are both set can be compared here; the phase
        // manager re-checks the merged thresholds.
        let set: Vec<(&str, f64)> = bounds
            .iter()
            .filter_map(|(field, value)| value.map(|v| (*field, v)))
            .collect();
        for pair in set.windows(2) {
            if pair[0].1 >= pair[1].1 {
                return Err(ValidationError::Conflict {
                    reason: format!(
                        "{} ({}) must be below {} ({})",
                        pair[0].0, pair[0].1, pair[1].0, pair[1].1
                    ),
                });
            }
        }

        if let Some(pct) = self.hysteresis_pct {
            if !(0.0..100.0).contains(&pct) {
                return Err(ValidationError::InvalidValue {
                    field: "phase.hysteresis_pct".into(),
                    reason: format!("must be in [0, 100), got {}", pct),
                });
            }
        }

        if self.check_interval_secs == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "phase.check_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
