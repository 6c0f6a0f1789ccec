//! Wire types of the archive REST API.

use chrono::{DateTime, Utc};
use dandidav_core::{AssetRecord, FolderRecord, PathRecord, ProjectRecord, VersionRecord};
use serde::Deserialize;

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    pub next: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DandisetPayload {
    pub identifier: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub draft_version: Option<VersionPayload>,
    pub most_recent_published_version: Option<VersionPayload>,
}

impl From<DandisetPayload> for ProjectRecord {
    fn from(p: DandisetPayload) -> Self {
        ProjectRecord {
            identifier: p.identifier,
            created: p.created,
            modified: p.modified,
            draft_version: p.draft_version.map(VersionRecord::from),
            most_recent_published_version: p
                .most_recent_published_version
                .map(VersionRecord::from),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionPayload {
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl From<VersionPayload> for VersionRecord {
    fn from(v: VersionPayload) -> Self {
        VersionRecord {
            identifier: v.version,
            name: v.name,
            size: v.size,
            created: v.created,
            modified: v.modified,
        }
    }
}

/// Entry of `/assets/paths/`: a folder when `asset` is null.
#[derive(Debug, Clone, Deserialize)]
pub struct PathNodePayload {
    pub path: String,
    #[serde(default)]
    pub aggregate_files: u64,
    #[serde(default)]
    pub aggregate_size: u64,
    pub asset: Option<PathAssetRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathAssetRef {
    pub asset_id: String,
}

impl PathNodePayload {
    /// Folder record for a node without an asset.
    pub fn into_folder(self) -> PathRecord {
        PathRecord::Folder(FolderRecord {
            path: self.path,
            total_size: self.aggregate_size,
            total_assets: self.aggregate_files,
        })
    }
}

/// Response of `/assets/{asset_id}/info/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetInfoPayload {
    pub asset_id: String,
    pub path: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Store id for Zarr assets, null for blobs.
    #[serde(default)]
    pub zarr: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AssetInfoPayload {
    /// The archive's ETag digest.
    pub fn etag(&self) -> Option<String> {
        self.metadata
            .get("digest")
            .and_then(|d| d.get("dandi:dandi-etag"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn encoding_format(&self) -> Option<String> {
        self.metadata
            .get("encodingFormat")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Record for this asset, fetched from `download`.
    pub fn into_record(self, download: String) -> AssetRecord {
        let etag = self.etag();
        let content_type = self.encoding_format();
        AssetRecord {
            download,
            zarr: self.zarr,
            asset_id: self.asset_id,
            path: self.path,
            size: self.size,
            created: self.created,
            modified: self.modified,
            etag,
            content_type,
        }
    }
}

/// Response of an S3 `ListObjectsV2` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    #[serde(default)]
    pub contents: Vec<S3Object>,
    #[serde(default)]
    pub common_prefixes: Vec<S3CommonPrefix>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3Object {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "ETag")]
    pub etag: Option<String>,
}

impl S3Object {
    /// ETag without the surrounding quotes S3 puts on it.
    pub fn bare_etag(&self) -> Option<String> {
        self.etag.as_deref().map(|e| e.trim_matches('"').to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3CommonPrefix {
    pub prefix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_info_extracts_etag_and_type() {
        let info: AssetInfoPayload = serde_json::from_value(serde_json::json!({
            "asset_id": "abc",
            "path": "sub-01/file.nwb",
            "size": 42,
            "created": "2023-01-01T12:00:00Z",
            "modified": "2023-01-02T12:00:00Z",
            "metadata": {
                "encodingFormat": "application/x-nwb",
                "digest": {"dandi:dandi-etag": "d41d8cd98f00b204e9800998ecf8427e-1"}
            }
        }))
        .unwrap();

        let download = "https://example.org/api/assets/abc/download/".to_string();
        let record = info.into_record(download.clone());
        assert_eq!(record.etag.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e-1"));
        assert_eq!(record.content_type.as_deref(), Some("application/x-nwb"));
        assert_eq!(record.download, download);
        assert_eq!(record.zarr, None);
    }

    #[test]
    fn test_asset_info_zarr_id() {
        let info: AssetInfoPayload = serde_json::from_value(serde_json::json!({
            "asset_id": "def",
            "path": "sub-01/image.ome.zarr",
            "size": 4096,
            "created": null,
            "modified": null,
            "zarr": "0d5b9be5-e626-4f6a-96da-b6b602954899"
        }))
        .unwrap();
        let record = info.into_record(String::new());
        assert_eq!(
            record.zarr.as_deref(),
            Some("0d5b9be5-e626-4f6a-96da-b6b602954899")
        );
    }

    #[test]
    fn test_list_bucket_result_from_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>dandiarchive</Name>
  <Prefix>zarr/abc/</Prefix>
  <KeyCount>3</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <Delimiter>/</Delimiter>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token-1</NextContinuationToken>
  <Contents>
    <Key>zarr/abc/.zattrs</Key>
    <LastModified>2023-01-01T12:00:00.000Z</LastModified>
    <ETag>&quot;0123abcd&quot;</ETag>
    <Size>12</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>zarr/abc/.zgroup</Key>
    <LastModified>2023-01-01T12:00:00.000Z</LastModified>
    <ETag>&quot;4567ef01&quot;</ETag>
    <Size>24</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <CommonPrefixes>
    <Prefix>zarr/abc/0/</Prefix>
  </CommonPrefixes>
</ListBucketResult>"#;

        let page: ListBucketResult = quick_xml::de::from_str(xml).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("token-1"));
        assert_eq!(page.contents.len(), 2);
        assert_eq!(page.contents[0].key, "zarr/abc/.zattrs");
        assert_eq!(page.contents[0].size, 12);
        assert_eq!(page.contents[0].bare_etag().as_deref(), Some("0123abcd"));
        assert!(page.contents[0].last_modified.is_some());
        assert_eq!(page.common_prefixes.len(), 1);
        assert_eq!(page.common_prefixes[0].prefix, "zarr/abc/0/");
    }

    #[test]
    fn test_empty_list_bucket_result() {
        let xml = r#"<ListBucketResult>
            <Name>dandiarchive</Name>
            <IsTruncated>false</IsTruncated>
        </ListBucketResult>"#;
        let page: ListBucketResult = quick_xml::de::from_str(xml).unwrap();
        assert!(!page.is_truncated);
        assert!(page.contents.is_empty());
        assert!(page.common_prefixes.is_empty());
    }

    #[test]
    fn test_asset_info_without_metadata() {
        let info: AssetInfoPayload = serde_json::from_value(serde_json::json!({
            "asset_id": "abc",
            "path": "file.bin",
            "size": 1,
            "created": null,
            "modified": null
        }))
        .unwrap();
        assert_eq!(info.etag(), None);
        assert_eq!(info.encoding_format(), None);
    }

    #[test]
    fn test_dandiset_payload_maps_versions() {
        let payload: DandisetPayload = serde_json::from_value(serde_json::json!({
            "identifier": "000001",
            "created": "2023-01-01T12:00:00Z",
            "modified": "2023-01-01T12:00:00Z",
            "draft_version": {
                "version": "draft",
                "name": "Test",
                "size": 10,
                "created": "2023-01-01T12:00:00Z",
                "modified": "2023-01-01T12:00:00Z"
            },
            "most_recent_published_version": null
        }))
        .unwrap();
        let record = ProjectRecord::from(payload);
        assert!(!record.has_published_version());
        assert_eq!(record.draft_version.unwrap().identifier, "draft");
    }
}
