//! dandidav Test Utilities
//!
//! Shared test infrastructure for the dandidav workspace:
//! - `MockArchive`, an in-memory `ArchiveClient` with call counters,
//!   failure injection, a fetch gate and byte stream release tracking
//! - Fixtures for common archive layouts
//! - Assertions for error variants

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;

// Re-export core types for convenience
pub use dandidav_core::{
    ArchiveClient, ArchiveError, AssetRecord, ByteStream, FolderRecord, PathRecord,
    ProjectRecord, VersionRecord, ZarrObjectRecord, ZarrRecord, DRAFT_VERSION,
};

/// Chunk size the mock splits asset content into.
pub const MOCK_CHUNK_SIZE: usize = 256;

/// Fixed timestamp used by every fixture record.
pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(1_672_574_400, 0).unwrap_or_default()
}

// ============================================================================
// MOCK ARCHIVE
// ============================================================================

/// Archive operations, for counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    ListProjects,
    GetProject,
    ListVersions,
    GetVersionMetadata,
    ListPathEntries,
    ListZarrEntries,
    OpenAssetRange,
}

/// An asset and its content.
#[derive(Debug, Clone)]
pub struct MockAsset {
    pub path: String,
    pub content: Bytes,
    pub content_type: Option<String>,
    /// Store id when the asset is a Zarr store.
    pub zarr: Option<String>,
}

/// A version and the assets it holds.
#[derive(Debug, Clone)]
pub struct MockVersion {
    pub identifier: String,
    pub metadata: Option<serde_json::Value>,
    pub assets: Vec<MockAsset>,
}

impl MockVersion {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            metadata: None,
            assets: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_asset(mut self, path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.assets.push(MockAsset {
            path: path.into(),
            content: content.into(),
            content_type: None,
            zarr: None,
        });
        self
    }

    /// Add a Zarr asset backed by the store registered as `zarr_id`.
    pub fn with_zarr_asset(
        mut self,
        path: impl Into<String>,
        zarr_id: impl Into<String>,
    ) -> Self {
        self.assets.push(MockAsset {
            path: path.into(),
            content: Bytes::new(),
            content_type: None,
            zarr: Some(zarr_id.into()),
        });
        self
    }

    pub fn with_typed_asset(
        mut self,
        path: impl Into<String>,
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        self.assets.push(MockAsset {
            path: path.into(),
            content: content.into(),
            content_type: Some(content_type.into()),
            zarr: None,
        });
        self
    }

    fn record(&self) -> VersionRecord {
        VersionRecord {
            identifier: self.identifier.clone(),
            name: format!("Version {}", self.identifier),
            size: self.assets.iter().map(|a| a.content.len() as u64).sum(),
            created: Some(fixed_timestamp()),
            modified: Some(fixed_timestamp()),
        }
    }
}

/// A project with its draft and published versions.
#[derive(Debug, Clone)]
pub struct MockProject {
    pub identifier: String,
    pub draft: MockVersion,
    /// Published versions, oldest first.
    pub releases: Vec<MockVersion>,
}

impl MockProject {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            draft: MockVersion::new(DRAFT_VERSION),
            releases: Vec::new(),
        }
    }

    pub fn with_draft(mut self, draft: MockVersion) -> Self {
        self.draft = MockVersion {
            identifier: DRAFT_VERSION.to_string(),
            ..draft
        };
        self
    }

    pub fn with_release(mut self, version: MockVersion) -> Self {
        self.releases.push(version);
        self
    }

    fn record(&self) -> ProjectRecord {
        ProjectRecord {
            identifier: self.identifier.clone(),
            created: Some(fixed_timestamp()),
            modified: Some(fixed_timestamp()),
            draft_version: Some(self.draft.record()),
            most_recent_published_version: self.releases.last().map(MockVersion::record),
        }
    }

    fn version(&self, version_id: &str) -> Option<&MockVersion> {
        if version_id == DRAFT_VERSION {
            return Some(&self.draft);
        }
        self.releases.iter().find(|v| v.identifier == version_id)
    }

    fn version_mut(&mut self, version_id: &str) -> Option<&mut MockVersion> {
        if version_id == DRAFT_VERSION {
            return Some(&mut self.draft);
        }
        self.releases.iter_mut().find(|v| v.identifier == version_id)
    }
}

/// Decrements the open stream count when a mock byte stream is dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory archive.
pub struct MockArchive {
    projects: RwLock<Vec<MockProject>>,
    /// Zarr store id to `(key, content)` objects.
    zarr_stores: RwLock<HashMap<String, Vec<(String, Bytes)>>>,
    calls: RwLock<HashMap<MockCall, usize>>,
    failures: RwLock<HashMap<MockCall, ArchiveError>>,
    stream_failure_after: RwLock<Option<usize>>,
    gate: watch::Sender<bool>,
    open_streams: Arc<AtomicUsize>,
}

impl Default for MockArchive {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            projects: RwLock::new(Vec::new()),
            zarr_stores: RwLock::new(HashMap::new()),
            calls: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            stream_failure_after: RwLock::new(None),
            gate,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, project: MockProject) -> Self {
        self.add_project(project);
        self
    }

    pub fn add_project(&self, project: MockProject) {
        self.projects.write().unwrap_or_else(PoisonError::into_inner).push(project);
    }

    /// Register the objects of a Zarr store. Keys are relative to the store
    /// root, e.g. `0/0`.
    pub fn with_zarr_store<K: Into<String>>(
        self,
        zarr_id: impl Into<String>,
        objects: impl IntoIterator<Item = (K, Bytes)>,
    ) -> Self {
        let objects = objects.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.zarr_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(zarr_id.into(), objects);
        self
    }

    /// Add an asset to an existing version.
    pub fn add_asset(&self, project_id: &str, version_id: &str, path: &str, content: Bytes) {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let version = projects
            .iter_mut()
            .find(|p| p.identifier == project_id)
            .and_then(|p| p.version_mut(version_id))
            .unwrap_or_else(|| panic!("no version {}/{} in mock", project_id, version_id));
        version.assets.push(MockAsset {
            path: path.to_string(),
            content,
            content_type: None,
            zarr: None,
        });
    }

    /// Number of times `call` has been made.
    pub fn calls(&self, call: MockCall) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).get(&call).copied().unwrap_or(0)
    }

    /// Total number of archive calls.
    pub fn total_calls(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).values().sum()
    }

    /// Make every subsequent `call` fail with `err`.
    pub fn fail(&self, call: MockCall, err: ArchiveError) {
        self.failures.write().unwrap_or_else(PoisonError::into_inner).insert(call, err);
    }

    pub fn clear_failure(&self, call: MockCall) {
        self.failures.write().unwrap_or_else(PoisonError::into_inner).remove(&call);
    }

    /// Make byte streams yield an upstream error after `chunks` chunks.
    pub fn fail_streams_after(&self, chunks: usize) {
        *self.stream_failure_after.write().unwrap_or_else(PoisonError::into_inner) = Some(chunks);
    }

    /// Block every fetch until [`MockArchive::open_gate`] is called.
    ///
    /// Calls are counted before they block.
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Byte streams handed out and not yet released.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: MockCall) -> Result<(), ArchiveError> {
        *self.calls.write().unwrap_or_else(PoisonError::into_inner).entry(call).or_insert(0) += 1;

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        match self.failures.read().unwrap_or_else(PoisonError::into_inner).get(&call) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn with_project_ref<T>(
        &self,
        project_id: &str,
        f: impl FnOnce(&MockProject) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let project = projects
            .iter()
            .find(|p| p.identifier == project_id)
            .ok_or_else(|| ArchiveError::not_found(format!("dandiset {}", project_id)))?;
        f(project)
    }

    fn with_version_ref<T>(
        &self,
        project_id: &str,
        version_id: &str,
        f: impl FnOnce(&MockVersion) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        self.with_project_ref(project_id, |project| {
            let version = project.version(version_id).ok_or_else(|| {
                ArchiveError::not_found(format!("version {}/{}", project_id, version_id))
            })?;
            f(version)
        })
    }

    fn asset_content(&self, download: &str) -> Option<Bytes> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let asset = projects
            .iter()
            .flat_map(|p| {
                std::iter::once(&p.draft)
                    .chain(p.releases.iter())
                    .flat_map(move |v| v.assets.iter().map(move |a| (p, v, a)))
            })
            .find(|(p, v, a)| asset_id(&p.identifier, &v.identifier, &a.path) == download)
            .map(|(_, _, a)| a.content.clone());
        if asset.is_some() {
            return asset;
        }

        let stores = self.zarr_stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.iter().find_map(|(zarr_id, objects)| {
            objects
                .iter()
                .find(|(key, _)| zarr_download(zarr_id, key) == download)
                .map(|(_, content)| content.clone())
        })
    }
}

fn zarr_download(zarr_id: &str, key: &str) -> String {
    format!("zarr:{}/{}", zarr_id, key)
}

fn asset_id(project_id: &str, version_id: &str, path: &str) -> String {
    format!("{}:{}:{}", project_id, version_id, path)
}

fn asset_record(project_id: &str, version_id: &str, asset: &MockAsset) -> AssetRecord {
    let id = asset_id(project_id, version_id, &asset.path);
    AssetRecord {
        asset_id: id.clone(),
        path: asset.path.clone(),
        size: asset.content.len() as u64,
        created: Some(fixed_timestamp()),
        modified: Some(fixed_timestamp()),
        etag: Some(format!("etag-{}", asset.path)),
        content_type: asset.content_type.clone(),
        download: id,
        zarr: asset.zarr.clone(),
    }
}

#[async_trait]
impl ArchiveClient for MockArchive {
    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ArchiveError> {
        self.enter(MockCall::ListProjects).await?;
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.iter().map(MockProject::record).collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectRecord, ArchiveError> {
        self.enter(MockCall::GetProject).await?;
        self.with_project_ref(project_id, |p| Ok(p.record()))
    }

    async fn list_versions(&self, project_id: &str) -> Result<Vec<VersionRecord>, ArchiveError> {
        self.enter(MockCall::ListVersions).await?;
        self.with_project_ref(project_id, |p| {
            Ok(p.releases.iter().map(MockVersion::record).collect())
        })
    }

    async fn get_version_metadata(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<Option<serde_json::Value>, ArchiveError> {
        self.enter(MockCall::GetVersionMetadata).await?;
        self.with_version_ref(project_id, version_id, |v| Ok(v.metadata.clone()))
    }

    async fn list_path_entries(
        &self,
        project_id: &str,
        version_id: &str,
        prefix: &[String],
    ) -> Result<Vec<PathRecord>, ArchiveError> {
        self.enter(MockCall::ListPathEntries).await?;
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.join("/"))
        };

        self.with_version_ref(project_id, version_id, |version| {
            let mut entries: Vec<PathRecord> = Vec::new();
            for asset in &version.assets {
                let Some(rest) = asset.path.strip_prefix(&prefix) else {
                    continue;
                };
                match rest.split_once('/') {
                    None => entries.push(PathRecord::Asset(asset_record(
                        project_id, version_id, asset,
                    ))),
                    Some((folder, _)) => {
                        let folder_path = format!("{}{}", prefix, folder);
                        let existing = entries.iter_mut().find_map(|e| match e {
                            PathRecord::Folder(f) if f.path == folder_path => Some(f),
                            _ => None,
                        });
                        match existing {
                            Some(f) => {
                                f.total_size += asset.content.len() as u64;
                                f.total_assets += 1;
                            }
                            None => entries.push(PathRecord::Folder(FolderRecord {
                                path: folder_path,
                                total_size: asset.content.len() as u64,
                                total_assets: 1,
                            })),
                        }
                    }
                }
            }
            Ok(entries)
        })
    }

    async fn list_zarr_entries(
        &self,
        zarr_id: &str,
        prefix: &[String],
    ) -> Result<Vec<ZarrRecord>, ArchiveError> {
        self.enter(MockCall::ListZarrEntries).await?;
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.join("/"))
        };

        let stores = self.zarr_stores.read().unwrap_or_else(PoisonError::into_inner);
        let objects = stores
            .get(zarr_id)
            .ok_or_else(|| ArchiveError::not_found(format!("zarr {}", zarr_id)))?;

        let mut entries: Vec<ZarrRecord> = Vec::new();
        for (key, content) in objects {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                None => entries.push(ZarrRecord::Object(ZarrObjectRecord {
                    name: rest.to_string(),
                    size: content.len() as u64,
                    modified: Some(fixed_timestamp()),
                    etag: Some(format!("etag-{}", key)),
                    download: zarr_download(zarr_id, key),
                })),
                Some((folder, _)) => {
                    let seen = entries
                        .iter()
                        .any(|e| matches!(e, ZarrRecord::Folder { name } if name == folder));
                    if !seen {
                        entries.push(ZarrRecord::Folder {
                            name: folder.to_string(),
                        });
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn open_asset_range(
        &self,
        download: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, ArchiveError> {
        self.enter(MockCall::OpenAssetRange).await?;

        let content = self
            .asset_content(download)
            .ok_or_else(|| ArchiveError::not_found(format!("asset {}", download)))?;

        let size = content.len() as u64;
        let start = offset.min(size) as usize;
        let end = length.map_or(size, |len| (offset + len).min(size)) as usize;
        let slice = content.slice(start..end);

        let mut chunks: Vec<Result<Bytes, ArchiveError>> = (0..slice.len())
            .step_by(MOCK_CHUNK_SIZE)
            .map(|i| Ok(slice.slice(i..(i + MOCK_CHUNK_SIZE).min(slice.len()))))
            .collect();
        let failure_after = *self
            .stream_failure_after
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(after) = failure_after {
            chunks.truncate(after);
            chunks.push(Err(ArchiveError::upstream("connection reset mid-stream")));
        }

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard(Arc::clone(&self.open_streams));
        let source = stream::iter(chunks).map(move |chunk| {
            let _held = &guard;
            chunk
        });
        Ok(ByteStream::from_stream(source))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built archives for common testing scenarios.

    use super::*;

    /// Deterministic content of `len` bytes.
    pub fn patterned_bytes(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    /// Project `P1` with published version `v1` holding one 1024 byte
    /// asset, `data.nwb`. The version has no metadata.
    pub fn single_asset_archive() -> MockArchive {
        MockArchive::new().with_project(
            MockProject::new("P1")
                .with_release(MockVersion::new("v1").with_asset("data.nwb", patterned_bytes(1024))),
        )
    }

    /// Project `Z1` whose draft and release `v1` hold `data.nwb` and a Zarr
    /// asset `image.zarr` backed by store `store-1`:
    ///
    /// ```text
    /// .zattrs  .zgroup  0/0 (1024 bytes)  0/1 (512 bytes)
    /// ```
    pub fn zarr_archive() -> MockArchive {
        let version = MockVersion::new("v1")
            .with_asset("data.nwb", patterned_bytes(64))
            .with_zarr_asset("image.zarr", "store-1");
        MockArchive::new()
            .with_project(
                MockProject::new("Z1")
                    .with_draft(version.clone())
                    .with_release(version),
            )
            .with_zarr_store(
                "store-1",
                [
                    (".zattrs", Bytes::from_static(b"{\"name\": \"image\"}")),
                    (".zgroup", Bytes::from_static(b"{\"zarr_format\": 2}")),
                    ("0/0", patterned_bytes(1024)),
                    ("0/1", patterned_bytes(512)),
                ],
            )
    }

    /// Two projects with nested folders, metadata and an unpublished one.
    pub fn nested_archive() -> MockArchive {
        let metadata = serde_json::json!({
            "name": "Test dataset",
            "license": ["spdx:CC-BY-4.0"],
        });
        let release = MockVersion::new("0.230101.1200")
            .with_metadata(metadata.clone())
            .with_asset("sub-02/sub-02_ses-01.nwb", patterned_bytes(300))
            .with_asset("sub-01/sub-01_ses-01.nwb", patterned_bytes(500))
            .with_asset("sub-01/sub-01_ses-02.nwb", patterned_bytes(700))
            .with_typed_asset("README.md", "# Test\n", "text/markdown");
        let draft = release
            .clone()
            .with_asset("sub-03/sub-03_ses-01.nwb", patterned_bytes(100));

        MockArchive::new()
            .with_project(
                MockProject::new("000001")
                    .with_draft(draft)
                    .with_release(release),
            )
            .with_project(
                MockProject::new("000002")
                    .with_draft(MockVersion::new(DRAFT_VERSION).with_asset("notes.txt", "wip")),
            )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for dandidav error variants.

    use dandidav_core::ProviderError;

    #[track_caller]
    pub fn assert_provider_not_found<T: std::fmt::Debug>(result: &Result<T, ProviderError>) {
        match result {
            Err(ProviderError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_provider_upstream<T: std::fmt::Debug>(result: &Result<T, ProviderError>) {
        match result {
            Err(ProviderError::Upstream { .. }) => {}
            other => panic!("Expected Upstream, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_provider_malformed<T: std::fmt::Debug>(result: &Result<T, ProviderError>) {
        match result {
            Err(ProviderError::Malformed { .. }) => {}
            other => panic!("Expected Malformed, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn test_mock_lists_direct_children() {
        let archive = nested_archive();
        let top = archive
            .list_path_entries("000001", "0.230101.1200", &[])
            .await
            .unwrap();
        let names: Vec<&str> = top.iter().map(PathRecord::name).collect();
        assert_eq!(names, vec!["sub-02", "sub-01", "README.md"]);

        let sub = archive
            .list_path_entries("000001", "0.230101.1200", &["sub-01".to_string()])
            .await
            .unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(archive.calls(MockCall::ListPathEntries), 2);
    }

    #[tokio::test]
    async fn test_mock_folder_aggregates() {
        let archive = nested_archive();
        let top = archive
            .list_path_entries("000001", "0.230101.1200", &[])
            .await
            .unwrap();
        match &top[1] {
            PathRecord::Folder(f) => {
                assert_eq!(f.total_size, 1200);
                assert_eq!(f.total_assets, 2);
            }
            other => panic!("expected folder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_stream_release_tracking() {
        let archive = single_asset_archive();
        let mut stream = archive
            .open_asset_range("P1:v1:data.nwb", 0, None)
            .await
            .unwrap();
        assert_eq!(archive.open_streams(), 1);
        assert!(stream.next_chunk().await.is_some());
        stream.release();
        assert_eq!(archive.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let archive = single_asset_archive();
        archive.fail(MockCall::ListProjects, ArchiveError::upstream("HTTP 503"));
        assert!(archive.list_projects().await.is_err());
        archive.clear_failure(MockCall::ListProjects);
        assert_eq!(archive.list_projects().await.unwrap().len(), 1);
        assert_eq!(archive.calls(MockCall::ListProjects), 2);
    }

    #[tokio::test]
    async fn test_mock_zarr_listing() {
        let archive = zarr_archive();
        let root = archive.list_zarr_entries("store-1", &[]).await.unwrap();
        let names: Vec<&str> = root.iter().map(ZarrRecord::name).collect();
        assert_eq!(names, vec![".zattrs", ".zgroup", "0"]);

        let chunks = archive
            .list_zarr_entries("store-1", &["0".to_string()])
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        let ZarrRecord::Object(object) = &chunks[1] else {
            panic!("expected object, got {:?}", chunks[1]);
        };
        assert_eq!(object.size, 512);

        let mut stream = archive
            .open_asset_range(&object.download, 0, None)
            .await
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), patterned_bytes(512));
        assert!(archive.list_zarr_entries("missing", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_unknown_project() {
        let archive = single_asset_archive();
        let err = archive.get_project("nope").await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { .. }));
    }
}
