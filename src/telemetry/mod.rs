//! Tracing subscriber setup.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Filter directives, overrides `log.level` | unset |
//! | `OUTBOX__LOG__LEVEL` | Default filter | `info` |
//! | `OUTBOX__LOG__FORMAT` | `pretty` or `json` | `pretty` |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),
    #[error("Unknown log format '{0}', expected 'pretty' or 'json'")]
    UnknownFormat(String),
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Initialize the tracing subscriber with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level`. Must be called once, before
/// the outbox service is constructed, so that its spans are recorded.
pub fn init_tracing(config: &LogConfig) -> TelemetryResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| TelemetryError::InvalidFilter(config.level.clone(), e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))?,
        other => return Err(TelemetryError::UnknownFormat(other.to_string())),
    }

    tracing::info!(level = %config.level, format = %config.format, "Tracing initialized");
    Ok(())
}
