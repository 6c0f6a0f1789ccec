//! Directory entries produced by a listing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Content type used when the archive does not report one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Whether an entry has children or content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Collection,
    Asset,
}

/// Where the bytes of an asset come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadHandle {
    /// Opaque handle passed back to `ArchiveClient::open_asset_range`.
    Remote(String),
    /// Content generated by the server itself.
    Inline(Bytes),
}

/// Position inside a Zarr store whose children are listed from the store
/// rather than the archive's path index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZarrLocation {
    pub zarr_id: String,
    /// Folders below the store root; empty for the root itself.
    pub prefix: Vec<String>,
}

impl ZarrLocation {
    pub fn root(zarr_id: impl Into<String>) -> Self {
        Self {
            zarr_id: zarr_id.into(),
            prefix: Vec::new(),
        }
    }

    /// Location of the folder `name` directly below this one.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut prefix = self.prefix.clone();
        prefix.push(name.into());
        Self {
            zarr_id: self.zarr_id.clone(),
            prefix,
        }
    }
}

/// One child in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    /// Byte length; always `Some` for assets and `None` for collections.
    pub size: Option<u64>,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub download: Option<DownloadHandle>,
    /// Set on collections that are (or lie inside) a Zarr store.
    pub zarr: Option<ZarrLocation>,
}

impl Entry {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Collection,
            size: None,
            created: None,
            modified: None,
            etag: None,
            content_type: None,
            download: None,
            zarr: None,
        }
    }

    pub fn asset(name: impl Into<String>, size: u64, download: DownloadHandle) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Asset,
            size: Some(size),
            created: None,
            modified: None,
            etag: None,
            content_type: None,
            download: Some(download),
            zarr: None,
        }
    }

    /// Asset whose content is held in memory.
    pub fn inline(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self::asset(name, content.len() as u64, DownloadHandle::Inline(content))
    }

    pub fn with_created(mut self, created: Option<Timestamp>) -> Self {
        self.created = created;
        self
    }

    pub fn with_modified(mut self, modified: Option<Timestamp>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_zarr(mut self, location: ZarrLocation) -> Self {
        self.zarr = Some(location);
        self
    }

    pub fn is_collection(&self) -> bool {
        match self.kind {
            EntryKind::Collection => true,
            EntryKind::Asset => false,
        }
    }
}

/// Requested slice of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u64,
    /// `None` reads to the end of the asset.
    pub length: Option<u64>,
}

impl ByteRange {
    /// The whole asset.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Everything from `offset` to the end.
    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Number of bytes this range covers in an asset of `size` bytes, or
    /// `None` if the offset lies past the end.
    pub fn clamped_len(&self, size: u64) -> Option<u64> {
        if self.offset > size {
            return None;
        }
        let available = size - self.offset;
        Some(self.length.map_or(available, |len| len.min(available)))
    }
}
