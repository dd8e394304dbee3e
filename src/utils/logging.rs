//! Structured logging setup.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global `tracing` subscriber built from `config`.
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Errors
/// `ConfigError` if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_format {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
