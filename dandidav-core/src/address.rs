//! Logical addresses and the path resolver.
//!
//! A WebDAV request path is turned into a [`LogicalAddress`] before anything
//! touches the archive. Resolution is purely syntactic: it never checks that
//! the project, version or file exists, but it always rejects paths that
//! could escape the namespace.
//!
//! Layout:
//!
//! ```text
//! /                                   Root (lists projects)
//! /dandisets/                         ProjectList
//! /{project}/                         Project (draft, latest, releases)
//! /{project}/releases/                VersionList
//! /{project}/{version}/               Version
//! /{project}/releases/{version}/      Version (same address as above)
//! /{project}/{version}/{path...}      PathInVersion
//! ```
//!
//! A leading `dandisets` segment is accepted in front of a project id, so
//! `/dandisets/000001/draft/` and `/000001/draft/` name the same thing.

use std::fmt;

use crate::error::ResolutionError;

/// Keyword naming the list of all projects.
pub const PROJECT_LIST_KEYWORD: &str = "dandisets";

/// Keyword naming the list of published versions of a project.
pub const RELEASES_KEYWORD: &str = "releases";

/// The mutable working version every project has.
pub const DRAFT_VERSION: &str = "draft";

/// Alias for the most recent published version.
pub const LATEST_VERSION: &str = "latest";

/// Returns true if the contents of `version_id` may change over time.
pub fn is_mutable_version(version_id: &str) -> bool {
    version_id == DRAFT_VERSION || version_id == LATEST_VERSION
}

/// Typed location in the virtual tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalAddress {
    Root,
    ProjectList,
    Project {
        project_id: String,
    },
    VersionList {
        project_id: String,
    },
    Version {
        project_id: String,
        version_id: String,
    },
    PathInVersion {
        project_id: String,
        version_id: String,
        segments: Vec<String>,
    },
}

impl LogicalAddress {
    /// Parse a raw (percent-encoded) request path.
    pub fn resolve(raw_path: &str) -> Result<Self, ResolutionError> {
        resolve(raw_path)
    }

    /// Project this address belongs to, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Root | Self::ProjectList => None,
            Self::Project { project_id }
            | Self::VersionList { project_id }
            | Self::Version { project_id, .. }
            | Self::PathInVersion { project_id, .. } => Some(project_id),
        }
    }

    /// Version this address belongs to, if any.
    pub fn version_id(&self) -> Option<&str> {
        match self {
            Self::Version { version_id, .. } | Self::PathInVersion { version_id, .. } => {
                Some(version_id)
            }
            _ => None,
        }
    }

    /// Whether a listing at this address can change while the process runs.
    ///
    /// Only the contents of a published version are immutable.
    pub fn is_volatile(&self) -> bool {
        match self {
            Self::Root | Self::ProjectList | Self::Project { .. } | Self::VersionList { .. } => {
                true
            }
            Self::Version { version_id, .. } | Self::PathInVersion { version_id, .. } => {
                is_mutable_version(version_id)
            }
        }
    }

    /// The address whose listing contains this one, plus the name it is
    /// listed under.
    ///
    /// `Root` and `ProjectList` have no parent listing.
    pub fn parent(&self) -> Option<(LogicalAddress, String)> {
        match self {
            Self::Root | Self::ProjectList => None,
            Self::Project { project_id } => Some((Self::ProjectList, project_id.clone())),
            Self::VersionList { project_id } => Some((
                Self::Project {
                    project_id: project_id.clone(),
                },
                RELEASES_KEYWORD.to_string(),
            )),
            Self::Version {
                project_id,
                version_id,
            } => {
                let parent = if is_mutable_version(version_id) {
                    Self::Project {
                        project_id: project_id.clone(),
                    }
                } else {
                    Self::VersionList {
                        project_id: project_id.clone(),
                    }
                };
                Some((parent, version_id.clone()))
            }
            Self::PathInVersion {
                project_id,
                version_id,
                segments,
            } => {
                let (name, rest) = segments.split_last()?;
                let parent = if rest.is_empty() {
                    Self::Version {
                        project_id: project_id.clone(),
                        version_id: version_id.clone(),
                    }
                } else {
                    Self::PathInVersion {
                        project_id: project_id.clone(),
                        version_id: version_id.clone(),
                        segments: rest.to_vec(),
                    }
                };
                Some((parent, name.clone()))
            }
        }
    }

    /// Canonical percent-encoded request path for this address.
    pub fn to_path(&self) -> String {
        match self {
            Self::Root => "/".to_string(),
            Self::ProjectList => format!("/{}/", PROJECT_LIST_KEYWORD),
            Self::Project { project_id } => format!("/{}/", encode(project_id)),
            Self::VersionList { project_id } => {
                format!("/{}/{}/", encode(project_id), RELEASES_KEYWORD)
            }
            Self::Version {
                project_id,
                version_id,
            } => format!("/{}/{}/", encode(project_id), encode(version_id)),
            Self::PathInVersion {
                project_id,
                version_id,
                segments,
            } => {
                let mut path = format!("/{}/{}", encode(project_id), encode(version_id));
                for segment in segments {
                    path.push('/');
                    path.push_str(&encode(segment));
                }
                path
            }
        }
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Parse a raw (percent-encoded) request path into a [`LogicalAddress`].
pub fn resolve(raw_path: &str) -> Result<LogicalAddress, ResolutionError> {
    let mut segments = Vec::new();
    for raw in raw_path.split('/').filter(|s| !s.is_empty()) {
        segments.push(decode_segment(raw_path, raw)?);
    }

    let mut rest: &[String] = &segments;
    if rest.first().map(String::as_str) == Some(PROJECT_LIST_KEYWORD) {
        rest = &rest[1..];
        if rest.is_empty() {
            return Ok(LogicalAddress::ProjectList);
        }
    }

    let Some((project_id, rest)) = rest.split_first() else {
        return Ok(LogicalAddress::Root);
    };
    let project_id = project_id.clone();

    let Some((version, rest)) = rest.split_first() else {
        return Ok(LogicalAddress::Project { project_id });
    };

    let (version_id, path) = if version == RELEASES_KEYWORD {
        match rest.split_first() {
            None => return Ok(LogicalAddress::VersionList { project_id }),
            Some((version_id, path)) => (version_id.clone(), path),
        }
    } else {
        (version.clone(), rest)
    };

    if path.is_empty() {
        Ok(LogicalAddress::Version {
            project_id,
            version_id,
        })
    } else {
        Ok(LogicalAddress::PathInVersion {
            project_id,
            version_id,
            segments: path.to_vec(),
        })
    }
}

/// Decode and validate a single non-empty path segment.
fn decode_segment(raw_path: &str, raw: &str) -> Result<String, ResolutionError> {
    check_traversal(raw_path, raw)?;

    let decoded = urlencoding::decode(raw)
        .map_err(|_| ResolutionError::malformed(raw_path, "segment is not valid UTF-8"))?;

    check_traversal(raw_path, &decoded)?;
    if let Some(c) = decoded
        .chars()
        .find(|c| *c == '/' || *c == '\\' || c.is_control())
    {
        return Err(ResolutionError::malformed(
            raw_path,
            format!("disallowed character {:?} in segment", c),
        ));
    }

    Ok(decoded.into_owned())
}

fn check_traversal(raw_path: &str, segment: &str) -> Result<(), ResolutionError> {
    if segment == "." || segment == ".." {
        return Err(ResolutionError::malformed(raw_path, "path traversal"));
    }
    Ok(())
}
