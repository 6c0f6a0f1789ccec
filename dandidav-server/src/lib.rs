//! dandidav - Read-only WebDAV view of the DANDI Archive
//!
//! Wires the archive client, the namespace provider and `dav-server` into an
//! axum application:
//! - `config`: process configuration from TOML and environment
//! - `dav`: the `dav-server` filesystem over the namespace provider
//! - `routes`: the router, write-method guard and status mapping
//! - `telemetry`: tracing subscriber setup

pub mod config;
pub mod dav;
pub mod error;
pub mod routes;
pub mod telemetry;

pub use config::ServerConfig;
pub use dav::{track_upstream, ArchiveDavFs, AssetFile, EntryMeta};
pub use error::{ServerError, ServerResult};
pub use routes::{
    create_router, reject_writes, DavState, ALLOWED_METHODS, DAV_COMPLIANCE, WRITE_METHODS,
};
