//! dandidav Core - Shared Types
//!
//! Addresses, entries, errors and the archive client contract. Every other
//! crate depends on this one; it performs no I/O of its own.

use chrono::{DateTime, Utc};

pub mod address;
pub mod archive;
pub mod config;
pub mod entry;
pub mod error;
pub mod stream;

pub use address::{
    is_mutable_version, resolve, LogicalAddress, DRAFT_VERSION, LATEST_VERSION,
    PROJECT_LIST_KEYWORD, RELEASES_KEYWORD,
};
pub use archive::{
    ArchiveClient, AssetRecord, FolderRecord, PathRecord, ProjectRecord, VersionRecord,
    ZarrObjectRecord, ZarrRecord,
};
pub use config::RetryConfig;
pub use entry::{
    ByteRange, DownloadHandle, Entry, EntryKind, ZarrLocation, DEFAULT_CONTENT_TYPE,
};
pub use error::{AdapterError, ArchiveError, ConfigError, ProviderError, ResolutionError};
pub use stream::ByteStream;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
