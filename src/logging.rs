/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::Settings;
use crate::error::{GatewayError, Result};

/// Initialize structured logging from the settings
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!("gateway_remote={}", settings.effective_level()))
        })
        .map_err(|e| GatewayError::Config(format!("Failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = settings.log_file {
        init_file_logging(log_path, env_filter)?;
    } else {
        init_stderr_logging(env_filter);
    }

    Ok(())
}

/// Initialize compact logging to stderr; stdout carries the listing
fn init_stderr_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize JSON logging to a file
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| GatewayError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Initialize logging for tests; safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gateway_remote=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_init_test_logging_twice() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("test logging initialized");
    }

    #[test]
    fn test_bad_log_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            log_level: LogLevel::Debug,
            log_file: Some(dir.path().join("missing").join("gateway.log")),
            ..Default::default()
        };

        // Fails on file creation, before any subscriber is installed.
        let err = init_file_logging(
            settings.log_file.as_deref().unwrap(),
            EnvFilter::new("gateway_remote=debug"),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
