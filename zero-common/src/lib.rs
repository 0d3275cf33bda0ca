//! Zero Common - Shared configuration, errors and logging for Zero services.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.codecoder/config.json` + `ZERO_*` env)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{Config, ObservabilityConfig, PhaseConfig};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, ObservabilityConfig, PhaseConfig};
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
