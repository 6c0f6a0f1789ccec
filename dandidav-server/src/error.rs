//! Server bootstrap errors.
//!
//! Request-time failures never surface here: they are mapped to HTTP
//! statuses by the WebDAV layer. These are the errors that stop the process
//! from starting or keep it from serving.

use dandidav_client::ClientError;
use dandidav_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("Failed to build archive client: {0}")]
    Client(#[from] ClientError),

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Result type for server bootstrap.
pub type ServerResult<T> = Result<T, ServerError>;
