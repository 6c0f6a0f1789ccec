//! HTTP client for the DANDI Archive REST API.

use std::time::Duration;

use async_trait::async_trait;
use dandidav_core::{
    ArchiveClient, ArchiveError, ByteStream, PathRecord, ProjectRecord, RetryConfig,
    VersionRecord, ZarrObjectRecord, ZarrRecord, DRAFT_VERSION,
};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::types::{
    AssetInfoPayload, DandisetPayload, ListBucketResult, Page, PathNodePayload, VersionPayload,
};

/// Public DANDI Archive API.
pub const DEFAULT_API_URL: &str = "https://api.dandiarchive.org/api";

/// Public bucket holding the contents of Zarr assets.
pub const DEFAULT_S3_URL: &str = "https://dandiarchive.s3.amazonaws.com";

/// Key prefix of Zarr stores in the bucket.
const ZARR_KEY_PREFIX: &str = "zarr";

/// Asset info requests issued concurrently while listing a folder.
const ASSET_INFO_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    /// Bucket endpoint for anonymous Zarr listings and downloads.
    pub s3_url: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            s3_url: DEFAULT_S3_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Archive client speaking the DANDI REST API.
#[derive(Clone)]
pub struct DandiClient {
    http: Client,
    base_url: String,
    s3_url: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for DandiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DandiClient")
            .field("base_url", &self.base_url)
            .field("s3_url", &self.s3_url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl DandiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base_url = config.api_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Config("api_url must not be empty".to_string()));
        }
        let s3_url = config.s3_url.trim().trim_end_matches('/').to_string();
        if s3_url.is_empty() {
            return Err(ClientError::Config("s3_url must not be empty".to_string()));
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("dandidav/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            s3_url,
            retry: config.retry.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn s3_url(&self) -> &str {
        &self.s3_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn asset_download_url(&self, asset_id: &str) -> String {
        self.url(&format!("/assets/{}/download/", enc(asset_id)))
    }

    /// Public URL of a bucket object; `/` in the key is kept.
    fn object_url(&self, key: &str) -> String {
        let key: Vec<_> = key.split('/').map(enc).collect();
        format!("{}/{}", self.s3_url, key.join("/"))
    }

    /// GET `url`, retrying connection failures, 5xx and 429 responses.
    async fn send(
        &self,
        url: &str,
        range: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut attempt = 0u32;
        loop {
            let mut request = self.http.get(url);
            if let Some(range) = range {
                request = request.header(RANGE, range);
            }

            let (err, retry_after) = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ClientError::NotFound {
                            url: url.to_string(),
                        });
                    }
                    let retryable =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    let err = ClientError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                        body,
                    };
                    if !retryable {
                        return Err(err);
                    }
                    (err, retry_after)
                }
                Err(err) if err.is_connect() || err.is_timeout() => (ClientError::Http(err), None),
                Err(err) => return Err(err.into()),
            };

            attempt += 1;
            if attempt > self.retry.max_retries {
                warn!(url, attempts = attempt, error = %err, "archive request failed");
                return Err(err);
            }
            let delay = retry_after
                .unwrap_or_else(|| self.retry.backoff_for(attempt))
                .min(self.retry.max_backoff);
            warn!(url, attempt, ?delay, error = %err, "retrying archive request");
            tokio::time::sleep(delay).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        debug!(url, "GET");
        let response = self.send(url, None).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_xml<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        debug!(url, "GET");
        let response = self.send(url, None).await?;
        let body = response.text().await?;
        Ok(quick_xml::de::from_str(&body)?)
    }

    /// Collect every page of a paginated listing.
    async fn paginate<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, ClientError> {
        let mut results = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url).await?;
            results.extend(page.results);
            next = page.next;
        }
        Ok(results)
    }

    async fn asset_info(
        &self,
        project_id: &str,
        version_id: &str,
        asset_id: &str,
    ) -> Result<AssetInfoPayload, ClientError> {
        let url = self.url(&format!(
            "/dandisets/{}/versions/{}/assets/{}/info/",
            enc(project_id),
            enc(version_id),
            enc(asset_id)
        ));
        self.get_json(&url).await
    }

    /// Every folder and object directly under `key_prefix`, following
    /// continuation tokens.
    async fn list_bucket_prefix(&self, key_prefix: &str) -> Result<Vec<ZarrRecord>, ClientError> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/?list-type=2&delimiter=%2F&prefix={}",
                self.s3_url,
                urlencoding::encode(key_prefix)
            );
            if let Some(token) = &token {
                url.push_str("&continuation-token=");
                url.push_str(&urlencoding::encode(token));
            }
            let page: ListBucketResult = self.get_xml(&url).await?;

            for folder in &page.common_prefixes {
                let name = relative_name(key_prefix, &folder.prefix)?.trim_end_matches('/');
                if !name.is_empty() {
                    records.push(ZarrRecord::Folder {
                        name: name.to_string(),
                    });
                }
            }
            for object in &page.contents {
                let name = relative_name(key_prefix, &object.key)?;
                // A key equal to the prefix is a folder marker, not a child.
                if name.is_empty() {
                    continue;
                }
                records.push(ZarrRecord::Object(ZarrObjectRecord {
                    name: name.to_string(),
                    size: object.size,
                    modified: object.last_modified,
                    etag: object.bare_etag(),
                    download: self.object_url(&object.key),
                }));
            }

            if !page.is_truncated {
                return Ok(records);
            }
            token = Some(page.next_continuation_token.ok_or_else(|| {
                ClientError::InvalidResponse(format!(
                    "truncated listing of {} without a continuation token",
                    key_prefix
                ))
            })?);
        }
    }
}

/// `key` with the listed `prefix` removed.
fn relative_name<'a>(prefix: &str, key: &'a str) -> Result<&'a str, ClientError> {
    key.strip_prefix(prefix).ok_or_else(|| {
        ClientError::InvalidResponse(format!("key {} is outside prefix {}", key, prefix))
    })
}

/// Bucket key prefix of a folder inside a Zarr store, with a trailing `/`.
fn zarr_key_prefix(zarr_id: &str, prefix: &[String]) -> String {
    let mut key = format!("{}/{}/", ZARR_KEY_PREFIX, zarr_id);
    for segment in prefix {
        key.push_str(segment);
        key.push('/');
    }
    key
}

fn enc(segment: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(segment)
}

/// `Range` header value for the requested slice, `None` for the whole asset.
fn range_header(offset: u64, length: Option<u64>) -> Option<String> {
    match length {
        Some(len) => Some(format!("bytes={}-{}", offset, offset + len - 1)),
        None if offset > 0 => Some(format!("bytes={}-", offset)),
        None => None,
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}

#[async_trait]
impl ArchiveClient for DandiClient {
    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ArchiveError> {
        let url = self.url("/dandisets/");
        let projects: Vec<DandisetPayload> = self.paginate(url).await?;
        Ok(projects.into_iter().map(ProjectRecord::from).collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectRecord, ArchiveError> {
        let url = self.url(&format!("/dandisets/{}/", enc(project_id)));
        let project: DandisetPayload = self.get_json(&url).await?;
        Ok(project.into())
    }

    async fn list_versions(&self, project_id: &str) -> Result<Vec<VersionRecord>, ArchiveError> {
        let url = self.url(&format!("/dandisets/{}/versions/", enc(project_id)));
        let versions: Vec<VersionPayload> = self.paginate(url).await?;
        Ok(versions
            .into_iter()
            .filter(|v| v.version != DRAFT_VERSION)
            .map(VersionRecord::from)
            .collect())
    }

    async fn get_version_metadata(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<Option<serde_json::Value>, ArchiveError> {
        let url = self.url(&format!(
            "/dandisets/{}/versions/{}/",
            enc(project_id),
            enc(version_id)
        ));
        let metadata: serde_json::Value = self.get_json(&url).await?;
        Ok(match metadata {
            serde_json::Value::Null => None,
            other => Some(other),
        })
    }

    async fn list_path_entries(
        &self,
        project_id: &str,
        version_id: &str,
        prefix: &[String],
    ) -> Result<Vec<PathRecord>, ArchiveError> {
        let url = self.url(&format!(
            "/dandisets/{}/versions/{}/assets/paths/?path_prefix={}",
            enc(project_id),
            enc(version_id),
            urlencoding::encode(&prefix.join("/"))
        ));
        let nodes: Vec<PathNodePayload> = self.paginate(url).await?;

        let records: Vec<PathRecord> = futures_util::stream::iter(nodes)
            .map(|node| async move {
                match &node.asset {
                    None => Ok::<_, ClientError>(node.into_folder()),
                    Some(asset) => {
                        let info = self
                            .asset_info(project_id, version_id, &asset.asset_id)
                            .await?;
                        let download = self.asset_download_url(&info.asset_id);
                        Ok(PathRecord::Asset(info.into_record(download)))
                    }
                }
            })
            .buffered(ASSET_INFO_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(records)
    }

    async fn list_zarr_entries(
        &self,
        zarr_id: &str,
        prefix: &[String],
    ) -> Result<Vec<ZarrRecord>, ArchiveError> {
        let key_prefix = zarr_key_prefix(zarr_id, prefix);
        Ok(self.list_bucket_prefix(&key_prefix).await?)
    }

    /// `download` is the URL recorded on the asset or Zarr object.
    async fn open_asset_range(
        &self,
        download: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ByteStream, ArchiveError> {
        if length == Some(0) {
            return Ok(ByteStream::empty());
        }
        let range = range_header(offset, length);
        debug!(url = download, range = ?range, "opening asset content");

        let response = self.send(download, range.as_deref()).await?;
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| ArchiveError::upstream(err.to_string())));

        let mut stream = ByteStream::from_stream(body);
        if !partial && offset > 0 {
            // The server ignored the range and sent the whole asset.
            stream = stream.skip(offset);
        }
        if let Some(length) = length {
            stream = stream.limit(length);
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, None), None);
        assert_eq!(range_header(10, None).as_deref(), Some("bytes=10-"));
        assert_eq!(range_header(0, Some(100)).as_deref(), Some("bytes=0-99"));
        assert_eq!(range_header(5, Some(1)).as_deref(), Some("bytes=5-5"));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert("retry-after", HeaderValue::from_static("0.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_parse_retry_after_saturates_huge_values() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1e300"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::MAX));

        for value in ["NaN", "inf", "-1"] {
            headers.insert("retry-after", HeaderValue::from_static(value));
            assert_eq!(parse_retry_after(&headers), None, "{}", value);
        }
    }

    #[test]
    fn test_zarr_key_prefix() {
        assert_eq!(zarr_key_prefix("abc", &[]), "zarr/abc/");
        assert_eq!(
            zarr_key_prefix("abc", &["0".to_string(), "1".to_string()]),
            "zarr/abc/0/1/"
        );
    }

    #[test]
    fn test_object_url_keeps_slashes() {
        let client = DandiClient::new(&ClientConfig {
            s3_url: "https://bucket.example.org/".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.object_url("zarr/abc/0/a b"),
            "https://bucket.example.org/zarr/abc/0/a%20b"
        );
    }

    #[test]
    fn test_relative_name_rejects_foreign_keys() {
        assert_eq!(relative_name("zarr/abc/", "zarr/abc/0/").unwrap(), "0/");
        assert!(matches!(
            relative_name("zarr/abc/", "zarr/other/0"),
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_retry_after_ignores_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_empty_api_url_rejected() {
        let config = ClientConfig {
            api_url: "  ".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            DandiClient::new(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = ClientConfig {
            api_url: "https://example.org/api/".to_string(),
            ..ClientConfig::default()
        };
        let client = DandiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://example.org/api");
    }
}
