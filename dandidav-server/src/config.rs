//! Server Configuration
//!
//! Settings come from an optional TOML file (`--config <path>` or
//! `DANDIDAV_CONFIG`) with environment variables layered on top. Every field
//! has a default, so running with no configuration at all serves the public
//! archive on localhost.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dandidav_client::{ClientConfig, DEFAULT_API_URL, DEFAULT_S3_URL};
use dandidav_core::{ConfigError, RetryConfig};
use dandidav_storage::CacheConfig;
use serde::Deserialize;

use crate::error::{ServerError, ServerResult};

const CONFIG_PATH_ENV: &str = "DANDIDAV_CONFIG";

/// Process configuration for the WebDAV server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    pub port: u16,

    /// Base URL of the archive REST API.
    pub api_url: String,

    /// Bucket endpoint serving Zarr store contents.
    pub s3_url: String,

    /// Seconds a draft or `latest` listing is served before refetching.
    pub volatile_ttl_secs: u64,

    /// Per-request timeout for archive calls.
    pub request_timeout_secs: u64,

    /// Retries after the first failed archive request.
    pub max_retries: u32,

    /// Wait before the first retry; doubles up to `retry_max_backoff_ms`.
    pub retry_initial_backoff_ms: u64,

    pub retry_max_backoff_ms: u64,

    /// Emit JSON log lines instead of plain text.
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_url: DEFAULT_API_URL.to_string(),
            s3_url: DEFAULT_S3_URL.to_string(),
            volatile_ttl_secs: 60,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 10_000,
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Load the file named on the command line or in `DANDIDAV_CONFIG` (if
    /// any), apply environment overrides and validate the result.
    pub fn load() -> ServerResult<Self> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> ServerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ServerError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ServerError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Overlay `DANDIDAV_*` variables read through `lookup`.
    ///
    /// Environment variables:
    /// - `DANDIDAV_HOST`: bind interface (default: 127.0.0.1)
    /// - `DANDIDAV_PORT`: bind port (default: 8080)
    /// - `DANDIDAV_API_URL`: archive API base URL
    /// - `DANDIDAV_S3_URL`: bucket endpoint for Zarr stores
    /// - `DANDIDAV_VOLATILE_TTL_SECS`: draft listing lifetime (default: 60)
    /// - `DANDIDAV_REQUEST_TIMEOUT_SECS`: archive request timeout (default: 30)
    /// - `DANDIDAV_MAX_RETRIES`: archive request retries (default: 3)
    /// - `DANDIDAV_RETRY_INITIAL_BACKOFF_MS` / `DANDIDAV_RETRY_MAX_BACKOFF_MS`:
    ///   retry backoff bounds (default: 100 / 10000)
    /// - `DANDIDAV_LOG_JSON`: "true" or "1" for JSON logs (default: false)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DANDIDAV_HOST") {
            self.host = host.trim().to_string();
        }
        if let Some(port) = lookup("DANDIDAV_PORT") {
            self.port = parse_field("port", &port)?;
        }
        if let Some(url) = lookup("DANDIDAV_API_URL") {
            self.api_url = url.trim().to_string();
        }
        if let Some(url) = lookup("DANDIDAV_S3_URL") {
            self.s3_url = url.trim().to_string();
        }
        if let Some(ttl) = lookup("DANDIDAV_VOLATILE_TTL_SECS") {
            self.volatile_ttl_secs = parse_field("volatile_ttl_secs", &ttl)?;
        }
        if let Some(timeout) = lookup("DANDIDAV_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_field("request_timeout_secs", &timeout)?;
        }
        if let Some(retries) = lookup("DANDIDAV_MAX_RETRIES") {
            self.max_retries = parse_field("max_retries", &retries)?;
        }
        if let Some(ms) = lookup("DANDIDAV_RETRY_INITIAL_BACKOFF_MS") {
            self.retry_initial_backoff_ms = parse_field("retry_initial_backoff_ms", &ms)?;
        }
        if let Some(ms) = lookup("DANDIDAV_RETRY_MAX_BACKOFF_MS") {
            self.retry_max_backoff_ms = parse_field("retry_max_backoff_ms", &ms)?;
        }
        if let Some(json) = lookup("DANDIDAV_LOG_JSON") {
            let json = json.trim().to_lowercase();
            self.log_json = json == "true" || json == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("port", "0", "must be > 0"));
        }
        if self.api_url.trim().is_empty() {
            return Err(invalid("api_url", "", "must not be empty"));
        }
        if self.s3_url.trim().is_empty() {
            return Err(invalid("s3_url", "", "must not be empty"));
        }
        if self.volatile_ttl_secs == 0 {
            return Err(invalid("volatile_ttl_secs", "0", "must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "0", "must be > 0"));
        }
        self.client_config().retry.validate()?;
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| invalid("host", &self.host, &e.to_string()))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_url: self.api_url.clone(),
            s3_url: self.s3_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryConfig {
                max_retries: self.max_retries,
                initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
                ..RetryConfig::default()
            },
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new().with_volatile_ttl(Duration::from_secs(self.volatile_ttl_secs))
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, value, &e.to_string()))
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}
