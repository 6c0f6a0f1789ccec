//! Forward-only byte stream over asset content.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex;

use crate::ArchiveError;

type Chunks = BoxStream<'static, Result<Bytes, ArchiveError>>;

/// Lazily produced asset bytes.
///
/// The stream is finite and cannot be restarted. The underlying source is
/// released as soon as the stream ends, fails, reaches its limit, or when
/// [`ByteStream::release`] is called; dropping the value releases it too.
pub struct ByteStream {
    // Only ever reached through `&mut self`, so the lock is never contended.
    // It exists to make the value `Sync`.
    inner: Mutex<Option<Chunks>>,
    skip: u64,
    remaining: Option<u64>,
}

impl ByteStream {
    pub fn from_stream<S>(source: S) -> Self
    where
        S: futures_util::Stream<Item = Result<Bytes, ArchiveError>> + Send + 'static,
    {
        Self {
            inner: Mutex::new(Some(source.boxed())),
            skip: 0,
            remaining: None,
        }
    }

    pub fn from_bytes(content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self::from_stream(stream::iter(std::iter::once(Ok(content))))
    }

    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Discard the first `count` bytes of the source.
    pub fn skip(mut self, count: u64) -> Self {
        self.skip += count;
        self
    }

    /// Stop after `count` bytes, releasing the source early.
    pub fn limit(mut self, count: u64) -> Self {
        self.remaining = Some(self.remaining.map_or(count, |r| r.min(count)));
        self
    }

    /// Next non-empty chunk, `None` once the stream is exhausted.
    ///
    /// An error item ends the stream.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ArchiveError>> {
        loop {
            if self.remaining == Some(0) {
                self.release_source();
                return None;
            }
            let source = self.inner.get_mut().as_mut()?;
            let item = source.next().await;
            match item {
                None => {
                    self.release_source();
                    return None;
                }
                Some(Err(err)) => {
                    self.release_source();
                    return Some(Err(err));
                }
                Some(Ok(mut chunk)) => {
                    if self.skip > 0 {
                        let n = self.skip.min(chunk.len() as u64);
                        chunk = chunk.slice(n as usize..);
                        self.skip -= n;
                    }
                    if chunk.is_empty() {
                        continue;
                    }
                    if let Some(remaining) = self.remaining {
                        if chunk.len() as u64 > remaining {
                            chunk.truncate(remaining as usize);
                        }
                        self.remaining = Some(remaining - chunk.len() as u64);
                    }
                    return Some(Ok(chunk));
                }
            }
        }
    }

    /// Drain the rest of the stream into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ArchiveError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }

    pub fn is_released(&mut self) -> bool {
        self.inner.get_mut().is_none()
    }

    /// Release the underlying source without reading the rest.
    pub fn release(mut self) {
        self.release_source();
    }

    fn release_source(&mut self) {
        self.inner.get_mut().take();
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("skip", &self.skip)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}
