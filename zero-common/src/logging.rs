//! Logging setup for Zero services.
//!
//! Installs a global `tracing` subscriber with either structured JSON or
//! human-readable output. `RUST_LOG` always wins over the configured level.
//!
//! # Noise Filtering
//!
//! Runtime internals (tokio, tokio_util) are pinned to `warn` so the phase
//! manager's own events stay readable at `debug`.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Modules that are always filtered to `warn`.
pub const NOISY_MODULES: &[&str] = &["tokio", "tokio_util", "runtime", "mio"];

/// Build the filter directive string for a base level plus exclusions.
fn filter_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }
    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

fn build_filter(log_level: &str, excluded_targets: &[String]) -> EnvFilter {
    // Environment override first
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(filter_directives(log_level, excluded_targets))
}

fn install(filter: EnvFilter, log_format: &str) {
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }
}

/// Initialize logging with the given level and format.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured JSON, anything else for pretty output
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Initialize logging with additional targets pinned to `warn`.
pub fn init_logging_with_exclusions(
    log_level: &str,
    log_format: &str,
    excluded_targets: &[String],
) {
    install(build_filter(log_level, excluded_targets), log_format);

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Initialize logging from the `observability` config section.
pub fn init_from_config(config: &ObservabilityConfig) {
    init_logging_with_exclusions(
        &config.log_level,
        &config.log_format,
        &config.excluded_targets,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert!(NOISY_MODULES.contains(&"tokio"));
        assert!(NOISY_MODULES.contains(&"tokio_util"));
    }

    #[test]
    fn test_filter_directives() {
        let directives = filter_directives("debug", &["zero_phase::scaler".to_string()]);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("tokio_util=warn"));
        assert!(directives.ends_with("zero_phase::scaler=warn"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging("info", "pretty");
        init_from_config(&ObservabilityConfig::default());
        tracing::info!("still logging");
    }
}
