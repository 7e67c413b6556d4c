//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log levels accepted by [`setup_logging`] and the configuration files
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`. Thread names are
/// included so lines from the send and receive workers can be told apart.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .map_err(|e| crate::Error::LoggingInit(e.to_string()))?;

    Ok(())
}

/// Check whether `level` is one of [`VALID_LOG_LEVELS`]
pub fn is_valid_level(level: &str) -> bool {
    VALID_LOG_LEVELS.contains(&level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_levels() {
        assert!(is_valid_level("debug"));
        assert!(is_valid_level("error"));
        assert!(!is_valid_level("verbose"));
        assert!(!is_valid_level("DEBUG"));
    }
}
