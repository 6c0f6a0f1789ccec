//! Tracing Subscriber Initialization
//!
//! Installs a global `tracing` subscriber with an `EnvFilter` and either a
//! JSON or a human-readable fmt layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_LOG_FILTER: &str = "dandidav=info,tower_http=info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded in the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "dandidav".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json: false,
        }
    }
}

impl From<&ServerConfig> for TelemetryConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            json: config.log_json,
            ..Self::default()
        }
    }
}

/// Build the filter from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Call once at startup, before anything logs. A second call fails because
/// a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> ServerResult<()> {
    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ServerError::Telemetry(e.to_string()))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        json = config.json,
        "Logging initialized"
    );

    Ok(())
}
