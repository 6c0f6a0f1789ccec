//! dandidav Storage - Namespace Provider, Listing Cache and Resource Adapter
//!
//! Maps the archive namespace onto collections and resources. All archive
//! access goes through an injected [`ArchiveClient`](dandidav_core::ArchiveClient);
//! listings are cached in memory for the lifetime of the provider.

pub mod adapter;
pub mod cache;
pub mod provider;

pub use adapter::Resource;
pub use cache::{CacheConfig, CacheRead, CacheStats, Freshness, Listing, ReadThroughCache};
pub use provider::{NamespaceProvider, FAST_NOT_EXIST, METADATA_CONTENT_TYPE, METADATA_FILE_NAME};
