//! dandidav Client - DANDI Archive REST client.
//!
//! Implements [`ArchiveClient`](dandidav_core::ArchiveClient) over HTTP with
//! pagination and retry handling. Zarr stores are listed from the archive's
//! public bucket.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientConfig, DandiClient, DEFAULT_API_URL, DEFAULT_S3_URL};
pub use error::ClientError;
