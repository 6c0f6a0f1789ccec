//! Resource adapter: the view of an entry the protocol layer works with.

use std::sync::Arc;

use dandidav_core::{
    AdapterError, ArchiveClient, ByteRange, ByteStream, DownloadHandle, Entry, Timestamp,
    DEFAULT_CONTENT_TYPE,
};
use tracing::warn;

/// An entry plus the means to read its content.
#[derive(Clone)]
pub struct Resource {
    entry: Entry,
    client: Arc<dyn ArchiveClient>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("entry", &self.entry).finish()
    }
}

impl Resource {
    pub fn new(entry: Entry, client: Arc<dyn ArchiveClient>) -> Self {
        Self { entry, client }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn is_collection(&self) -> bool {
        self.entry.is_collection()
    }

    /// Byte length; 0 for collections.
    pub fn content_length(&self) -> u64 {
        self.entry.size.unwrap_or(0)
    }

    pub fn last_modified(&self) -> Option<Timestamp> {
        self.entry.modified
    }

    pub fn created(&self) -> Option<Timestamp> {
        self.entry.created
    }

    pub fn entity_tag(&self) -> Option<&str> {
        self.entry.etag.as_deref()
    }

    /// MIME type of the content; `None` for collections.
    pub fn content_type(&self) -> Option<&str> {
        if self.is_collection() {
            return None;
        }
        Some(
            self.entry
                .content_type
                .as_deref()
                .unwrap_or(DEFAULT_CONTENT_TYPE),
        )
    }

    /// Stream the bytes covered by `range`.
    ///
    /// A length running past the end is clamped. An offset past the end is
    /// `RangeOutOfBounds`; an offset exactly at the end yields an empty
    /// stream without contacting the archive.
    pub async fn open_range(&self, range: ByteRange) -> Result<ByteStream, AdapterError> {
        let download = match (&self.entry.download, self.is_collection()) {
            (Some(download), false) => download,
            _ => {
                return Err(AdapterError::NotAnAsset {
                    name: self.entry.name.clone(),
                })
            }
        };

        let size = self.content_length();
        let length = range
            .clamped_len(size)
            .ok_or(AdapterError::RangeOutOfBounds {
                offset: range.offset,
                length: size,
            })?;
        if length == 0 {
            return Ok(ByteStream::empty());
        }

        match download {
            DownloadHandle::Inline(content) => {
                let start = range.offset as usize;
                let end = start + length as usize;
                Ok(ByteStream::from_bytes(content.slice(start..end)))
            }
            DownloadHandle::Remote(handle) => {
                let stream = self
                    .client
                    .open_asset_range(handle, range.offset, Some(length))
                    .await
                    .map_err(|err| {
                        warn!(
                            name = %self.entry.name,
                            error = %err,
                            "failed to open asset content"
                        );
                        AdapterError::from(err)
                    })?;
                Ok(stream.limit(length))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dandidav_core::ArchiveError;
    use dandidav_test_utils::fixtures::*;
    use dandidav_test_utils::{MockArchive, MockCall};

    fn data_resource(archive: &Arc<MockArchive>) -> Resource {
        let entry = Entry::asset(
            "data.nwb",
            1024,
            DownloadHandle::Remote("P1:v1:data.nwb".to_string()),
        );
        Resource::new(entry, archive.clone())
    }

    #[tokio::test]
    async fn test_full_range_reads_everything() {
        let archive = Arc::new(single_asset_archive());
        let resource = data_resource(&archive);

        let mut stream = resource.open_range(ByteRange::full()).await.unwrap();
        let body = stream.read_to_end().await.unwrap();
        assert_eq!(body, patterned_bytes(1024));
        assert_eq!(archive.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_partial_range_matches_slice() {
        let archive = Arc::new(single_asset_archive());
        let resource = data_resource(&archive);
        let expected = patterned_bytes(1024);

        let mut stream = resource
            .open_range(ByteRange::new(100, Some(300)))
            .await
            .unwrap();
        let body = stream.read_to_end().await.unwrap();
        assert_eq!(body, expected.slice(100..400));
    }

    #[tokio::test]
    async fn test_length_past_end_is_clamped() {
        let archive = Arc::new(single_asset_archive());
        let resource = data_resource(&archive);

        let mut stream = resource
            .open_range(ByteRange::new(1000, Some(500)))
            .await
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap().len(), 24);
    }

    #[tokio::test]
    async fn test_offset_at_end_is_empty_without_archive_call() {
        let archive = Arc::new(single_asset_archive());
        let resource = data_resource(&archive);

        let mut stream = resource.open_range(ByteRange::from_offset(1024)).await.unwrap();
        assert!(stream.next_chunk().await.is_none());
        assert_eq!(archive.calls(MockCall::OpenAssetRange), 0);
    }

    #[tokio::test]
    async fn test_offset_past_end_is_out_of_bounds() {
        let archive = Arc::new(single_asset_archive());
        let resource = data_resource(&archive);

        let err = resource
            .open_range(ByteRange::from_offset(1025))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::RangeOutOfBounds {
                offset: 1025,
                length: 1024
            }
        );
    }

    #[tokio::test]
    async fn test_collection_is_not_an_asset() {
        let archive = Arc::new(single_asset_archive());
        let resource = Resource::new(Entry::collection("sub-01"), archive.clone());

        assert_eq!(resource.content_length(), 0);
        assert_eq!(resource.content_type(), None);
        let err = resource.open_range(ByteRange::full()).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotAnAsset { .. }));
    }

    #[tokio::test]
    async fn test_inline_content_is_served_from_memory() {
        let archive = Arc::new(MockArchive::new());
        let resource = Resource::new(
            Entry::inline("dandiset.yaml", Bytes::from_static(b"name: test\n")),
            archive.clone(),
        );

        let mut stream = resource
            .open_range(ByteRange::new(6, Some(4)))
            .await
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), Bytes::from_static(b"test"));
        assert_eq!(archive.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_surfaces_as_error_item() {
        let archive = Arc::new(single_asset_archive());
        archive.fail_streams_after(1);
        let resource = data_resource(&archive);

        let mut stream = resource.open_range(ByteRange::full()).await.unwrap();
        assert!(stream.next_chunk().await.unwrap().is_ok());
        let err = stream.next_chunk().await.unwrap().unwrap_err();
        assert!(matches!(err, ArchiveError::Upstream { .. }));
        assert_eq!(archive.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_released_early_stream_returns_connection() {
        let archive = Arc::new(single_asset_archive());
        let resource = data_resource(&archive);

        let mut stream = resource.open_range(ByteRange::full()).await.unwrap();
        assert!(stream.next_chunk().await.is_some());
        assert_eq!(archive.open_streams(), 1);
        drop(stream);
        assert_eq!(archive.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_upstream() {
        let archive = Arc::new(single_asset_archive());
        archive.fail(MockCall::OpenAssetRange, ArchiveError::upstream("HTTP 500"));
        let resource = data_resource(&archive);

        let err = resource.open_range(ByteRange::full()).await.unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
