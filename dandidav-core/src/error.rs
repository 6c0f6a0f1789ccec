//! Error types for dandidav operations

use thiserror::Error;

/// Path resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Malformed path {path:?}: {reason}")]
    Malformed { path: String, reason: String },
}

impl ResolutionError {
    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status the protocol layer should answer with.
    pub fn status_code(&self) -> u16 {
        400
    }
}

/// Errors reported by an archive client implementation.
///
/// The client has already exhausted its own retries when it returns
/// `Upstream`; callers must not retry again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Not found in archive: {resource}")]
    NotFound { resource: String },

    #[error("Archive request failed: {reason}")]
    Upstream { reason: String },
}

impl ArchiveError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        Self::Upstream {
            reason: reason.into(),
        }
    }
}

/// Namespace tree provider errors.
///
/// `Clone` so that one fetch result can be handed to every caller waiting on
/// the same cache slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No such resource: {path}")]
    NotFound { path: String },

    #[error("Archive unavailable: {reason}")]
    Upstream { reason: String },

    #[error("Inconsistent address {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl ProviderError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach the requested path to an archive failure.
    ///
    /// Only an explicit `NotFound` from the archive becomes a 404; everything
    /// else stays a transient upstream failure.
    pub fn from_archive(path: impl Into<String>, err: ArchiveError) -> Self {
        match err {
            ArchiveError::NotFound { .. } => Self::NotFound { path: path.into() },
            ArchiveError::Upstream { reason } => Self::Upstream { reason },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }

    /// HTTP status the protocol layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Upstream { .. } => 502,
            Self::Malformed { .. } => 500,
        }
    }
}

/// Resource adapter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{name} is a collection and has no content")]
    NotAnAsset { name: String },

    #[error("Range offset {offset} is beyond content length {length}")]
    RangeOutOfBounds { offset: u64, length: u64 },

    #[error("Content transfer failed: {reason}")]
    Upstream { reason: String },
}

impl AdapterError {
    /// HTTP status the protocol layer should answer with.
    ///
    /// A mid-stream `Upstream` failure cannot change the status that was
    /// already sent; the response is aborted instead.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotAnAsset { .. } => 405,
            Self::RangeOutOfBounds { .. } => 416,
            Self::Upstream { .. } => 502,
        }
    }
}

impl From<ArchiveError> for AdapterError {
    fn from(err: ArchiveError) -> Self {
        let reason = match err {
            ArchiveError::NotFound { resource } => format!("content vanished: {}", resource),
            ArchiveError::Upstream { reason } => reason,
        };
        Self::Upstream { reason }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// =============================================================================
// TESTS
// =============================================================================
