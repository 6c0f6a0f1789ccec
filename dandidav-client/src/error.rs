//! Error types for the archive client.

use dandidav_core::ArchiveError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::de::DeError),
    #[error("Not found: {url}")]
    NotFound { url: String },
    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<ClientError> for ArchiveError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound { url } => ArchiveError::not_found(url),
            other => ArchiveError::upstream(other.to_string()),
        }
    }
}
