//! WebDAV filesystem backed by the namespace provider.
//!
//! `dav-server` drives PROPFIND, GET and HEAD through the
//! [`DavFileSystem`] implemented here. Every path is resolved to a
//! [`LogicalAddress`] and answered from the provider; nothing is ever
//! written.

use std::cell::Cell;
use std::future::Future;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use dandidav_core::{
    resolve, AdapterError, ByteRange, ByteStream, Entry, LogicalAddress, ProviderError,
};
use dandidav_storage::{NamespaceProvider, Resource};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream,
    OpenOptions, ReadDirMeta,
};
use futures_util::{stream, FutureExt};
use tracing::{debug, warn};

tokio::task_local! {
    static UPSTREAM_FAILURE: Cell<bool>;
}

/// Run `future` while recording whether any filesystem call inside it hit
/// an archive failure.
pub async fn track_upstream<F: Future>(future: F) -> (F::Output, bool) {
    UPSTREAM_FAILURE
        .scope(Cell::new(false), async move {
            let output = future.await;
            let failed = UPSTREAM_FAILURE.with(Cell::get);
            (output, failed)
        })
        .await
}

fn note_upstream_failure() {
    // Body streaming runs outside any tracked request; nothing to record.
    let _ = UPSTREAM_FAILURE.try_with(|flag| flag.set(true));
}

fn address_of(path: &DavPath) -> FsResult<LogicalAddress> {
    resolve(&path.as_url_string()).map_err(|err| {
        debug!(error = %err, "rejected path");
        FsError::Forbidden
    })
}

fn provider_fs_error(err: ProviderError) -> FsError {
    match err {
        ProviderError::NotFound { .. } => FsError::NotFound,
        ProviderError::Upstream { reason } => {
            warn!(%reason, "archive request failed");
            note_upstream_failure();
            FsError::GeneralFailure
        }
        ProviderError::Malformed { path, reason } => {
            warn!(%path, %reason, "inconsistent namespace lookup");
            FsError::GeneralFailure
        }
    }
}

fn adapter_fs_error(err: AdapterError) -> FsError {
    match err {
        AdapterError::NotAnAsset { .. } => FsError::Forbidden,
        AdapterError::RangeOutOfBounds { .. } => FsError::GeneralFailure,
        AdapterError::Upstream { reason } => {
            warn!(%reason, "asset content unavailable");
            note_upstream_failure();
            FsError::GeneralFailure
        }
    }
}

/// Read-only filesystem over the archive namespace.
#[derive(Clone)]
pub struct ArchiveDavFs {
    provider: Arc<NamespaceProvider>,
}

impl ArchiveDavFs {
    pub fn new(provider: Arc<NamespaceProvider>) -> Self {
        Self { provider }
    }
}

impl DavFileSystem for ArchiveDavFs {
    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            if options.write
                || options.append
                || options.truncate
                || options.create
                || options.create_new
            {
                return Err(FsError::Forbidden);
            }
            let address = address_of(path)?;
            let resource = self
                .provider
                .resource(&address)
                .await
                .map_err(provider_fs_error)?;
            if resource.is_collection() {
                return Err(FsError::Forbidden);
            }
            Ok(Box::new(AssetFile::new(resource)) as Box<dyn DavFile>)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            let address = address_of(path)?;
            let listing = self
                .provider
                .list(&address)
                .await
                .map_err(provider_fs_error)?;
            let entries: Vec<FsResult<Box<dyn DavDirEntry>>> = listing
                .iter()
                .map(|entry| Ok(Box::new(ArchiveDirEntry::from(entry)) as Box<dyn DavDirEntry>))
                .collect();
            Ok(Box::pin(stream::iter(entries)) as FsStream<Box<dyn DavDirEntry>>)
        }
        .boxed()
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let address = address_of(path)?;
            let entry = self
                .provider
                .stat(&address)
                .await
                .map_err(provider_fs_error)?;
            Ok(Box::new(EntryMeta::from(&entry)) as Box<dyn DavMetaData>)
        }
        .boxed()
    }
}

/// Properties of an entry as WebDAV reports them.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    len: u64,
    is_dir: bool,
    modified: Option<SystemTime>,
    created: Option<SystemTime>,
    etag: Option<String>,
}

impl From<&Entry> for EntryMeta {
    fn from(entry: &Entry) -> Self {
        Self {
            len: entry.size.unwrap_or(0),
            is_dir: entry.is_collection(),
            modified: entry.modified.map(SystemTime::from),
            created: entry.created.map(SystemTime::from),
            etag: entry.etag.clone(),
        }
    }
}

impl DavMetaData for EntryMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        self.modified.ok_or(FsError::NotImplemented)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn etag(&self) -> Option<String> {
        self.etag.clone()
    }

    fn created(&self) -> FsResult<SystemTime> {
        self.created.ok_or(FsError::NotImplemented)
    }
}

struct ArchiveDirEntry {
    name: String,
    meta: EntryMeta,
}

impl From<&Entry> for ArchiveDirEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            name: entry.name.clone(),
            meta: EntryMeta::from(entry),
        }
    }
}

impl DavDirEntry for ArchiveDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) }.boxed()
    }
}

/// An open asset.
///
/// Content is streamed from the current position; seeking drops the
/// stream and the next read opens a new one at the target offset.
#[derive(Debug)]
pub struct AssetFile {
    resource: Resource,
    position: u64,
    stream: Option<ByteStream>,
    pending: Bytes,
}

impl AssetFile {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            position: 0,
            stream: None,
            pending: Bytes::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    async fn next_chunk(&mut self) -> FsResult<Option<Bytes>> {
        if self.stream.is_none() {
            if self.position >= self.resource.content_length() {
                return Ok(None);
            }
            let stream = self
                .resource
                .open_range(ByteRange::from_offset(self.position))
                .await
                .map_err(adapter_fs_error)?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let next = stream.next_chunk().await;
        match next {
            None => Ok(None),
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => {
                warn!(
                    name = self.resource.name(),
                    position = self.position,
                    error = %err,
                    "asset stream failed"
                );
                self.stream = None;
                note_upstream_failure();
                Err(FsError::GeneralFailure)
            }
        }
    }

    /// Read up to `count` bytes; fewer only at end of content.
    pub async fn read_up_to(&mut self, count: usize) -> FsResult<Bytes> {
        let mut out = BytesMut::new();
        while out.len() < count {
            if self.pending.is_empty() {
                match self.next_chunk().await? {
                    Some(chunk) => self.pending = chunk,
                    None => break,
                }
                continue;
            }
            let take = (count - out.len()).min(self.pending.len());
            if out.is_empty() && take == count {
                self.position += take as u64;
                return Ok(self.pending.split_to(take));
            }
            out.extend_from_slice(&self.pending.split_to(take));
            self.position += take as u64;
        }
        Ok(out.freeze())
    }

    pub fn seek_to(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.resource.content_length().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        }
        .ok_or(FsError::GeneralFailure)?;

        if target != self.position {
            self.stream = None;
            self.pending = Bytes::new();
            self.position = target;
        }
        Ok(target)
    }
}

impl DavFile for AssetFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = EntryMeta::from(self.resource.entry());
        async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) }.boxed()
    }

    fn write_buf(&mut self, _buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        async { Err(FsError::Forbidden) }.boxed()
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        async { Err(FsError::Forbidden) }.boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        self.read_up_to(count).boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let result = self.seek_to(pos);
        async move { result }.boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        async { Ok(()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dandidav_core::ArchiveError;
    use dandidav_storage::CacheConfig;
    use dandidav_test_utils::fixtures::*;
    use dandidav_test_utils::{MockArchive, MockCall};

    fn provider(archive: &Arc<MockArchive>) -> Arc<NamespaceProvider> {
        Arc::new(NamespaceProvider::new(archive.clone(), CacheConfig::default()))
    }

    async fn open_data(archive: &Arc<MockArchive>) -> AssetFile {
        let provider = provider(archive);
        let address = resolve("/P1/v1/data.nwb").unwrap();
        AssetFile::new(provider.resource(&address).await.unwrap())
    }

    #[tokio::test]
    async fn test_reads_fill_requested_count() {
        let archive = Arc::new(single_asset_archive());
        let mut file = open_data(&archive).await;
        let expected = patterned_bytes(1024);

        let first = file.read_up_to(300).await.unwrap();
        assert_eq!(first, expected.slice(0..300));
        let rest = file.read_up_to(4096).await.unwrap();
        assert_eq!(rest, expected.slice(300..));
        assert!(file.read_up_to(10).await.unwrap().is_empty());
        assert_eq!(file.position(), 1024);
    }

    #[tokio::test]
    async fn test_seek_reopens_at_offset() {
        let archive = Arc::new(single_asset_archive());
        let mut file = open_data(&archive).await;
        let expected = patterned_bytes(1024);

        file.read_up_to(10).await.unwrap();
        assert_eq!(file.seek_to(SeekFrom::Start(900)).unwrap(), 900);
        assert_eq!(archive.open_streams(), 0);

        let tail = file.read_up_to(200).await.unwrap();
        assert_eq!(tail, expected.slice(900..));
        assert_eq!(archive.calls(MockCall::OpenAssetRange), 2);
    }

    #[tokio::test]
    async fn test_seek_to_current_position_keeps_stream() {
        let archive = Arc::new(single_asset_archive());
        let mut file = open_data(&archive).await;

        file.read_up_to(10).await.unwrap();
        assert_eq!(file.seek_to(SeekFrom::Current(0)).unwrap(), 10);
        file.read_up_to(10).await.unwrap();
        assert_eq!(archive.calls(MockCall::OpenAssetRange), 1);
    }

    #[tokio::test]
    async fn test_seek_from_end_and_before_start() {
        let archive = Arc::new(single_asset_archive());
        let mut file = open_data(&archive).await;

        assert_eq!(file.seek_to(SeekFrom::End(-24)).unwrap(), 1000);
        assert_eq!(file.read_up_to(100).await.unwrap().len(), 24);
        assert!(file.seek_to(SeekFrom::End(-2000)).is_err());
    }

    #[tokio::test]
    async fn test_read_past_end_is_empty_without_archive_call() {
        let archive = Arc::new(single_asset_archive());
        let mut file = open_data(&archive).await;

        file.seek_to(SeekFrom::Start(5000)).unwrap();
        assert!(file.read_up_to(10).await.unwrap().is_empty());
        assert_eq!(archive.calls(MockCall::OpenAssetRange), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_tracked() {
        let archive = Arc::new(single_asset_archive());
        archive.fail(MockCall::OpenAssetRange, ArchiveError::upstream("HTTP 503"));
        let mut file = open_data(&archive).await;

        let (result, failed) = track_upstream(file.read_up_to(10)).await;
        assert!(result.is_err());
        assert!(failed);
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_upstream_failure() {
        let archive = Arc::new(single_asset_archive());
        let provider = provider(&archive);
        let address = resolve("/P1/v1/missing.nwb").unwrap();

        let (result, failed) = track_upstream(provider.stat(&address)).await;
        let err = result.unwrap_err();
        assert!(matches!(provider_fs_error(err), FsError::NotFound));
        assert!(!failed);
    }

    #[test]
    fn test_entry_meta_reports_entry_properties() {
        let entry = Entry::collection("sub-01");
        let meta = EntryMeta::from(&entry);
        assert!(meta.is_dir());
        assert_eq!(meta.len(), 0);
        assert!(meta.modified().is_err());
        assert_eq!(meta.etag(), None);
    }
}
