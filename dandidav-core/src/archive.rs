//! Archive client contract and the records it returns.
//!
//! Implementations do their own pagination and retries. A returned
//! `ArchiveError::Upstream` is final.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ArchiveError, ByteStream, Timestamp};

/// A project (Dandiset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub identifier: String,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
    pub draft_version: Option<VersionRecord>,
    pub most_recent_published_version: Option<VersionRecord>,
}

impl ProjectRecord {
    pub fn has_published_version(&self) -> bool {
        self.most_recent_published_version.is_some()
    }
}

/// A version of a project, either `draft` or a published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub identifier: String,
    pub name: String,
    pub size: u64,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
}

/// A folder inside a version, with aggregate statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Full path from the version root, without a trailing slash.
    pub path: String,
    pub total_size: u64,
    pub total_assets: u64,
}

/// A file inside a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    /// Full path from the version root.
    pub path: String,
    pub size: u64,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Handle for [`ArchiveClient::open_asset_range`].
    pub download: String,
    /// Store id when the asset is a Zarr store rather than a single blob.
    pub zarr: Option<String>,
}

/// One child of a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathRecord {
    Folder(FolderRecord),
    Asset(AssetRecord),
}

/// An object inside a Zarr store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZarrObjectRecord {
    /// Name relative to the listed prefix.
    pub name: String,
    pub size: u64,
    pub modified: Option<Timestamp>,
    pub etag: Option<String>,
    /// Handle for [`ArchiveClient::open_asset_range`].
    pub download: String,
}

/// One child of a prefix inside a Zarr store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZarrRecord {
    Folder { name: String },
    Object(ZarrObjectRecord),
}

impl ZarrRecord {
    pub fn name(&self) -> &str {
        match self {
            Self::Folder { name } => name,
            Self::Object(object) => &object.name,
        }
    }
}

impl PathRecord {
    pub fn path(&self) -> &str {
        match self {
            Self::Folder(folder) => &folder.path,
            Self::Asset(asset) => &asset.path,
        }
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        let path = self.path();
        path.rsplit('/').next().unwrap_or(path)
    }
}

/// Read access to the remote archive.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Every project, in archive order.
    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ArchiveError>;

    async fn get_project(&self, project_id: &str) -> Result<ProjectRecord, ArchiveError>;

    /// Published versions of a project; `draft` is not included.
    async fn list_versions(&self, project_id: &str) -> Result<Vec<VersionRecord>, ArchiveError>;

    /// Raw metadata document of a version, `None` if the archive has none.
    async fn get_version_metadata(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<Option<serde_json::Value>, ArchiveError>;

    /// Folders and assets directly under `prefix` (empty for the version root).
    async fn list_path_entries(
        &self,
        project_id: &str,
        version_id: &str,
        prefix: &[String],
    ) -> Result<Vec<PathRecord>, ArchiveError>;

    /// Folders and objects directly under `prefix` of Zarr store `zarr_id`
    /// (empty for the store root).
    async fn list_zarr_entries(
        &self,
        zarr_id: &str,
        prefix: &[String],
    ) -> Result<Vec<ZarrRecord>, ArchiveError>;

    /// Open `length` bytes (or everything) from `offset` of an asset or a
    /// Zarr object.
    async fn open_asset_range(
        &self,
        download: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, ArchiveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_record_name() {
        let folder = PathRecord::Folder(FolderRecord {
            path: "sub-01/ses-01".to_string(),
            total_size: 10,
            total_assets: 1,
        });
        assert_eq!(folder.name(), "ses-01");

        let top = PathRecord::Folder(FolderRecord {
            path: "sub-01".to_string(),
            total_size: 10,
            total_assets: 1,
        });
        assert_eq!(top.name(), "sub-01");
    }

    #[test]
    fn test_zarr_record_name() {
        let folder = ZarrRecord::Folder {
            name: "0".to_string(),
        };
        assert_eq!(folder.name(), "0");

        let object = ZarrRecord::Object(ZarrObjectRecord {
            name: ".zattrs".to_string(),
            size: 12,
            modified: None,
            etag: None,
            download: "zarr/abc/.zattrs".to_string(),
        });
        assert_eq!(object.name(), ".zattrs");
    }
}
