//! Log output setup for binaries and tests embedding the queue.
//!
//! The library itself only emits `tracing` events; nothing is printed until a
//! subscriber is installed, either by the host application or by
//! [`init_logging`].

use crate::{BatchworkError, Result, config::LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Builds the filter for a logging configuration.
///
/// `RUST_LOG` takes precedence when set; otherwise the configured level is
/// used as the filter directive.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| BatchworkError::Logging {
        message: format!("Invalid log level '{}': {}", config.level, e),
    })
}

/// Installs a global `fmt` subscriber.
///
/// Fails if another global subscriber has already been installed.
///
/// # Examples
///
/// ```rust,no_run
/// use batchwork::{config::LoggingConfig, logging::init_logging};
///
/// init_logging(&LoggingConfig::default()).expect("logging already initialised");
/// tracing::info!("queue ready");
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .try_init()
        .map_err(|e| BatchworkError::Logging {
            message: format!("Failed to initialize tracing subscriber: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_from_level() {
        let config = LoggingConfig {
            level: "batchwork=debug,warn".to_string(),
            ..Default::default()
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        let second = init_logging(&config);

        assert!(matches!(second, Err(BatchworkError::Logging { .. })));
    }
}
