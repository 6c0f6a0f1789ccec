//! Namespace tree provider.
//!
//! Turns a [`LogicalAddress`] into the entries a WebDAV client sees, going
//! through the listing cache for every archive lookup.

use std::sync::Arc;

use dandidav_core::{
    ArchiveClient, ArchiveError, DownloadHandle, Entry, LogicalAddress, PathRecord,
    ProjectRecord, ProviderError, ZarrLocation, ZarrRecord, DEFAULT_CONTENT_TYPE, DRAFT_VERSION,
    LATEST_VERSION, PROJECT_LIST_KEYWORD, RELEASES_KEYWORD,
};
use futures_util::future::{BoxFuture, FutureExt};
use tracing::{info, warn};

use crate::adapter::Resource;
use crate::cache::{CacheConfig, CacheStats, Listing, ReadThroughCache};

/// Names that are reported missing inside a version without asking the
/// archive. Clients ask for these constantly.
pub const FAST_NOT_EXIST: &[&str] = &[".git", ".svn", ".bzr", ".nols"];

/// Name of the generated metadata file in every version root.
pub const METADATA_FILE_NAME: &str = "dandiset.yaml";

/// Content type of the generated metadata file.
pub const METADATA_CONTENT_TYPE: &str = "text/yaml; charset=utf-8";

/// Resolves addresses to entries and listings.
pub struct NamespaceProvider {
    client: Arc<dyn ArchiveClient>,
    cache: ReadThroughCache,
}

impl NamespaceProvider {
    pub fn new(client: Arc<dyn ArchiveClient>, config: CacheConfig) -> Self {
        Self {
            client,
            cache: ReadThroughCache::new(config),
        }
    }

    pub fn client(&self) -> &Arc<dyn ArchiveClient> {
        &self.client
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Children of the collection at `address`.
    ///
    /// Fails with `Malformed` when `address` names an asset and with
    /// `NotFound` when it names nothing.
    pub async fn list(&self, address: &LogicalAddress) -> Result<Listing, ProviderError> {
        let mut zarr = None;
        if let LogicalAddress::PathInVersion { .. } = address {
            let entry = self.stat(address).await?;
            if !entry.is_collection() {
                return Err(ProviderError::malformed(
                    address.to_path(),
                    "cannot list the children of an asset",
                ));
            }
            zarr = entry.zarr;
        }

        let read = self
            .cache
            .get_or_fetch(address, || self.fetch_listing(address, zarr.as_ref()))
            .await?;
        Ok(read.into_value())
    }

    /// The entry named by `address`.
    ///
    /// Root and the project list are synthetic collections; everything else
    /// is looked up by name in its parent's listing.
    pub fn stat<'a>(
        &'a self,
        address: &'a LogicalAddress,
    ) -> BoxFuture<'a, Result<Entry, ProviderError>> {
        async move {
            match address {
                LogicalAddress::Root => return Ok(Entry::collection("")),
                LogicalAddress::ProjectList => {
                    return Ok(Entry::collection(PROJECT_LIST_KEYWORD))
                }
                LogicalAddress::PathInVersion { segments, .. } if is_fast_not_exist(segments) => {
                    return Err(ProviderError::not_found(address.to_path()));
                }
                _ => {}
            }

            let Some((parent, name)) = address.parent() else {
                return Err(ProviderError::not_found(address.to_path()));
            };
            let siblings = self.list(&parent).await.map_err(|err| match err {
                // A missing parent means a missing child; an asset parent
                // means the child cannot exist either.
                ProviderError::Malformed { .. } => ProviderError::not_found(address.to_path()),
                ProviderError::NotFound { .. } => ProviderError::not_found(address.to_path()),
                other => other,
            })?;

            siblings
                .iter()
                .find(|entry| entry.name == name)
                .cloned()
                .ok_or_else(|| ProviderError::not_found(address.to_path()))
        }
        .boxed()
    }

    /// The entry at `address` wrapped for content access.
    pub async fn resource(&self, address: &LogicalAddress) -> Result<Resource, ProviderError> {
        let entry = self.stat(address).await?;
        Ok(Resource::new(entry, Arc::clone(&self.client)))
    }

    async fn fetch_listing(
        &self,
        address: &LogicalAddress,
        zarr: Option<&ZarrLocation>,
    ) -> Result<Vec<Entry>, ProviderError> {
        info!(%address, "fetching listing from archive");
        let path = address.to_path();
        let result = match (address, zarr) {
            (_, Some(location)) => self.fetch_zarr(location).await,
            (LogicalAddress::Root, None) => self.fetch_root().await,
            (LogicalAddress::ProjectList, None) => self.fetch_projects().await,
            (LogicalAddress::Project { project_id }, None) => self.fetch_project(project_id).await,
            (LogicalAddress::VersionList { project_id }, None) => {
                self.fetch_versions(project_id).await
            }
            (
                LogicalAddress::Version {
                    project_id,
                    version_id,
                },
                None,
            ) => self.fetch_version_root(project_id, version_id).await,
            (
                LogicalAddress::PathInVersion {
                    project_id,
                    version_id,
                    segments,
                },
                None,
            ) => self.fetch_path(project_id, version_id, segments).await,
        };

        result.map_err(|err| {
            let err = match err {
                FetchError::Archive(err) => ProviderError::from_archive(path.clone(), err),
                FetchError::Provider(err) => err,
            };
            if err.is_upstream() {
                warn!(%address, error = %err, "archive listing failed");
            }
            err
        })
    }

    /// The project-list keyword followed by every project.
    async fn fetch_root(&self) -> Result<Vec<Entry>, FetchError> {
        let mut entries = vec![Entry::collection(PROJECT_LIST_KEYWORD)];
        entries.extend(self.fetch_projects().await?);
        Ok(entries)
    }

    async fn fetch_projects(&self) -> Result<Vec<Entry>, FetchError> {
        let projects = self.client.list_projects().await?;
        Ok(projects
            .into_iter()
            .map(|p| {
                Entry::collection(p.identifier)
                    .with_created(p.created)
                    .with_modified(p.modified)
            })
            .collect())
    }

    async fn fetch_project(&self, project_id: &str) -> Result<Vec<Entry>, FetchError> {
        let project = self.client.get_project(project_id).await?;

        let draft_modified = project
            .draft_version
            .as_ref()
            .and_then(|v| v.modified)
            .or(project.modified);
        let mut entries = vec![Entry::collection(DRAFT_VERSION)
            .with_created(project.created)
            .with_modified(draft_modified)];

        if let Some(latest) = &project.most_recent_published_version {
            entries.push(
                Entry::collection(LATEST_VERSION)
                    .with_created(latest.created)
                    .with_modified(latest.modified),
            );
            entries.push(
                Entry::collection(RELEASES_KEYWORD)
                    .with_created(project.created)
                    .with_modified(latest.modified),
            );
        }
        Ok(entries)
    }

    async fn fetch_versions(&self, project_id: &str) -> Result<Vec<Entry>, FetchError> {
        let versions = self.client.list_versions(project_id).await?;
        Ok(versions
            .into_iter()
            .filter(|v| v.identifier != DRAFT_VERSION)
            .map(|v| {
                Entry::collection(v.identifier)
                    .with_created(v.created)
                    .with_modified(v.modified)
            })
            .collect())
    }

    async fn fetch_version_root(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<Vec<Entry>, FetchError> {
        let version_id = self.concrete_version(project_id, version_id).await?;

        let metadata = self
            .client
            .get_version_metadata(project_id, &version_id)
            .await?;
        let records = self
            .client
            .list_path_entries(project_id, &version_id, &[])
            .await?;

        let mut entries: Vec<Entry> = records.into_iter().map(path_entry).collect();
        if let Some(metadata) = metadata {
            if !entries.iter().any(|e| e.name == METADATA_FILE_NAME) {
                entries.push(metadata_entry(project_id, &version_id, &metadata)?);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn fetch_path(
        &self,
        project_id: &str,
        version_id: &str,
        segments: &[String],
    ) -> Result<Vec<Entry>, FetchError> {
        let version_id = self.concrete_version(project_id, version_id).await?;
        let records = self
            .client
            .list_path_entries(project_id, &version_id, segments)
            .await?;
        Ok(records.into_iter().map(path_entry).collect())
    }

    async fn fetch_zarr(&self, location: &ZarrLocation) -> Result<Vec<Entry>, FetchError> {
        let records = self
            .client
            .list_zarr_entries(&location.zarr_id, &location.prefix)
            .await?;
        Ok(records
            .into_iter()
            .map(|record| zarr_entry(location, record))
            .collect())
    }

    /// Archive identifier for `version_id`, resolving the `latest` alias.
    async fn concrete_version(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<String, FetchError> {
        if version_id != LATEST_VERSION {
            return Ok(version_id.to_string());
        }
        let project: ProjectRecord = self.client.get_project(project_id).await?;
        project
            .most_recent_published_version
            .map(|v| v.identifier)
            .ok_or_else(|| {
                FetchError::Provider(ProviderError::not_found(format!(
                    "/{}/{}/",
                    project_id, LATEST_VERSION
                )))
            })
    }
}

/// Failure while assembling a listing, before the address is attached.
enum FetchError {
    Archive(ArchiveError),
    Provider(ProviderError),
}

impl From<ArchiveError> for FetchError {
    fn from(err: ArchiveError) -> Self {
        Self::Archive(err)
    }
}

fn is_fast_not_exist(segments: &[String]) -> bool {
    segments
        .iter()
        .any(|segment| FAST_NOT_EXIST.contains(&segment.as_str()))
}

fn path_entry(record: PathRecord) -> Entry {
    let name = record.name().to_string();
    match record {
        PathRecord::Folder(_) => Entry::collection(name),
        // A Zarr asset is a store of many objects, browsed as a folder.
        PathRecord::Asset(asset) => match asset.zarr {
            Some(zarr_id) => Entry::collection(name)
                .with_created(asset.created)
                .with_modified(asset.modified)
                .with_zarr(ZarrLocation::root(zarr_id)),
            None => {
                let content_type = asset
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
                Entry::asset(name, asset.size, DownloadHandle::Remote(asset.download))
                    .with_created(asset.created)
                    .with_modified(asset.modified)
                    .with_etag(asset.etag)
                    .with_content_type(content_type)
            }
        },
    }
}

fn zarr_entry(location: &ZarrLocation, record: ZarrRecord) -> Entry {
    match record {
        ZarrRecord::Folder { name } => {
            let child = location.child(name.as_str());
            Entry::collection(name).with_zarr(child)
        }
        ZarrRecord::Object(object) => {
            Entry::asset(object.name, object.size, DownloadHandle::Remote(object.download))
                .with_modified(object.modified)
                .with_etag(object.etag)
                .with_content_type(DEFAULT_CONTENT_TYPE)
        }
    }
}

fn metadata_entry(
    project_id: &str,
    version_id: &str,
    metadata: &serde_json::Value,
) -> Result<Entry, FetchError> {
    let yaml = serde_yaml::to_string(metadata).map_err(|err| {
        FetchError::Provider(ProviderError::malformed(
            format!("/{}/{}/{}", project_id, version_id, METADATA_FILE_NAME),
            format!("metadata cannot be rendered as YAML: {}", err),
        ))
    })?;
    Ok(Entry::inline(METADATA_FILE_NAME, yaml).with_content_type(METADATA_CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dandidav_core::{resolve, EntryKind};
    use dandidav_test_utils::assertions::*;
    use dandidav_test_utils::fixtures::*;
    use dandidav_test_utils::{MockArchive, MockCall};

    fn provider(archive: &Arc<MockArchive>) -> NamespaceProvider {
        NamespaceProvider::new(archive.clone(), CacheConfig::default())
    }

    fn names(listing: &Listing) -> Vec<&str> {
        listing.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_root_and_project_list_list_projects() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let root = provider.list(&LogicalAddress::Root).await.unwrap();
        assert_eq!(names(&root), vec!["dandisets", "000001", "000002"]);
        assert!(root.iter().all(Entry::is_collection));

        let list = provider.list(&LogicalAddress::ProjectList).await.unwrap();
        assert_eq!(names(&list), vec!["000001", "000002"]);
    }

    #[tokio::test]
    async fn test_project_listing_layout() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let published = provider.list(&resolve("/000001/").unwrap()).await.unwrap();
        assert_eq!(names(&published), vec!["draft", "latest", "releases"]);

        let unpublished = provider.list(&resolve("/000002/").unwrap()).await.unwrap();
        assert_eq!(names(&unpublished), vec!["draft"]);
    }

    #[tokio::test]
    async fn test_version_root_sorted_with_metadata_file() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let listing = provider
            .list(&resolve("/000001/0.230101.1200/").unwrap())
            .await
            .unwrap();
        assert_eq!(
            names(&listing),
            vec!["README.md", "dandiset.yaml", "sub-01", "sub-02"]
        );

        let yaml = listing.iter().find(|e| e.name == "dandiset.yaml").unwrap();
        assert_eq!(yaml.kind, EntryKind::Asset);
        assert_eq!(yaml.content_type.as_deref(), Some(METADATA_CONTENT_TYPE));
        assert_eq!(yaml.etag, None);
        match &yaml.download {
            Some(DownloadHandle::Inline(content)) => {
                let text = std::str::from_utf8(content).unwrap();
                assert!(text.contains("name: Test dataset"));
                assert_eq!(yaml.size, Some(content.len() as u64));
            }
            other => panic!("expected inline content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_version_without_metadata_has_no_metadata_file() {
        let archive = Arc::new(single_asset_archive());
        let provider = provider(&archive);

        let listing = provider.list(&resolve("/P1/v1/").unwrap()).await.unwrap();
        assert_eq!(names(&listing), vec!["data.nwb"]);
        assert_eq!(listing[0].size, Some(1024));
        assert!(!listing[0].is_collection());
    }

    #[tokio::test]
    async fn test_latest_alias_matches_release() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let latest = provider.list(&resolve("/000001/latest/").unwrap()).await.unwrap();
        let release = provider
            .list(&resolve("/000001/releases/0.230101.1200/").unwrap())
            .await
            .unwrap();
        assert_eq!(names(&latest), names(&release));
    }

    #[tokio::test]
    async fn test_latest_without_release_is_not_found() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let result = provider.list(&resolve("/000002/latest/").unwrap()).await;
        assert_provider_not_found(&result);
    }

    #[tokio::test]
    async fn test_version_list_excludes_draft() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let listing = provider
            .list(&resolve("/000001/releases/").unwrap())
            .await
            .unwrap();
        assert_eq!(names(&listing), vec!["0.230101.1200"]);
    }

    #[tokio::test]
    async fn test_nested_path_listing_and_stat() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let listing = provider
            .list(&resolve("/000001/draft/sub-01/").unwrap())
            .await
            .unwrap();
        assert_eq!(
            names(&listing),
            vec!["sub-01_ses-01.nwb", "sub-01_ses-02.nwb"]
        );

        let entry = provider
            .stat(&resolve("/000001/draft/sub-01/sub-01_ses-02.nwb").unwrap())
            .await
            .unwrap();
        assert_eq!(entry.size, Some(700));
        assert_eq!(entry.content_type.as_deref(), Some(DEFAULT_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_listing_an_asset_is_malformed() {
        let archive = Arc::new(single_asset_archive());
        let provider = provider(&archive);

        let result = provider.list(&resolve("/P1/v1/data.nwb").unwrap()).await;
        assert_provider_malformed(&result);
    }

    #[tokio::test]
    async fn test_missing_entries_are_not_found() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        for path in [
            "/999999/",
            "/000001/9.9.9/",
            "/000001/draft/missing.nwb",
            "/000001/draft/missing/deeper",
            "/000001/draft/README.md/child",
        ] {
            let addr = resolve(path).unwrap();
            let result = provider.stat(&addr).await;
            assert_provider_not_found(&result);
        }

        let result = provider.list(&resolve("/999999/").unwrap()).await;
        assert_provider_not_found(&result);
    }

    #[tokio::test]
    async fn test_fast_not_exist_skips_archive() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        let result = provider
            .stat(&resolve("/000001/draft/.git").unwrap())
            .await;
        assert_provider_not_found(&result);
        let result = provider
            .list(&resolve("/000001/draft/.svn/objects").unwrap())
            .await;
        assert_provider_not_found(&result);
        assert_eq!(archive.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates_and_is_not_cached() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);

        archive.fail(MockCall::ListProjects, ArchiveError::upstream("HTTP 503"));
        let result = provider.list(&LogicalAddress::Root).await;
        assert_provider_upstream(&result);

        archive.clear_failure(MockCall::ListProjects);
        let listing = provider.list(&LogicalAddress::Root).await.unwrap();
        assert_eq!(listing.len(), 3);
        assert_eq!(archive.calls(MockCall::ListProjects), 2);
    }

    #[tokio::test]
    async fn test_zarr_asset_is_a_collection() {
        let archive = Arc::new(zarr_archive());
        let provider = provider(&archive);

        let listing = provider.list(&resolve("/Z1/v1/").unwrap()).await.unwrap();
        assert_eq!(names(&listing), vec!["data.nwb", "image.zarr"]);
        let zarr = &listing[1];
        assert!(zarr.is_collection());
        assert_eq!(zarr.download, None);
        assert_eq!(zarr.zarr, Some(ZarrLocation::root("store-1")));
    }

    #[tokio::test]
    async fn test_zarr_contents_listed_from_store() {
        let archive = Arc::new(zarr_archive());
        let provider = provider(&archive);

        let root = provider
            .list(&resolve("/Z1/v1/image.zarr/").unwrap())
            .await
            .unwrap();
        assert_eq!(names(&root), vec![".zattrs", ".zgroup", "0"]);
        assert!(root[2].is_collection());

        let chunks = provider
            .list(&resolve("/Z1/v1/image.zarr/0").unwrap())
            .await
            .unwrap();
        assert_eq!(names(&chunks), vec!["0", "1"]);
        assert_eq!(chunks[1].size, Some(512));
        assert_eq!(chunks[1].etag.as_deref(), Some("etag-0/1"));
        assert_eq!(chunks[1].content_type.as_deref(), Some(DEFAULT_CONTENT_TYPE));

        // Path entries are only asked for the version root.
        assert_eq!(archive.calls(MockCall::ListPathEntries), 1);
        assert_eq!(archive.calls(MockCall::ListZarrEntries), 2);
    }

    #[tokio::test]
    async fn test_zarr_object_readable() {
        let archive = Arc::new(zarr_archive());
        let provider = provider(&archive);

        let resource = provider
            .resource(&resolve("/Z1/draft/image.zarr/0/0").unwrap())
            .await
            .unwrap();
        assert_eq!(resource.content_length(), 1024);
        let mut stream = resource
            .open_range(dandidav_core::ByteRange::new(1000, Some(100)))
            .await
            .unwrap();
        assert_eq!(
            stream.read_to_end().await.unwrap(),
            patterned_bytes(1024).slice(1000..)
        );
    }

    #[tokio::test]
    async fn test_zarr_missing_entries_are_not_found() {
        let archive = Arc::new(zarr_archive());
        let provider = provider(&archive);

        for path in [
            "/Z1/v1/image.zarr/missing",
            "/Z1/v1/image.zarr/0/9",
            "/Z1/v1/image.zarr/.zattrs/child",
            "/Z1/v1/image.zarr/.git",
        ] {
            let result = provider.stat(&resolve(path).unwrap()).await;
            assert_provider_not_found(&result);
        }
    }

    #[tokio::test]
    async fn test_repeated_list_is_identical() {
        let archive = Arc::new(nested_archive());
        let provider = provider(&archive);
        let addr = resolve("/000001/0.230101.1200/sub-01").unwrap();

        let first = provider.list(&addr).await.unwrap();
        let second = provider.list(&addr).await.unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
