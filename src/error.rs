use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of an album sync against the remote API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("album request failed with HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    /// The body was not a list of photo records.
    #[error("unexpected album response: {0}")]
    Schema(String),

    /// Connection, TLS or timeout failure before a response arrived.
    #[error("album request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failure inside the on-disk image cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache key {0:?}")]
    InvalidKey(String),
}

impl CacheError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Failure turning a photo record into something the display can show.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("image download failed with HTTP {status}")]
    Remote { status: u16, url: String },

    #[error("server returned {content_type:?} instead of an image")]
    ContentType { content_type: String },

    #[error("image download failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RotationError {
    #[error("no photos available in album")]
    NoPhotos,
}

/// Category of a failure reported to the display side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Remote,
    Schema,
    ContentType,
    NoPhotos,
    Filesystem,
    Transport,
}

/// Which half of a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Album metadata could not be refreshed.
    Sync,
    /// Metadata is fine but the selected photo could not be turned into an image.
    Resolve,
}

/// User-visible error carried by the `ERROR` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub stage: FailureStage,
    pub message: String,
    /// Photo the helper is positioned on after a Resolve failure; the next `Next` names it.
    pub photo_id: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            photo_id: None,
        }
    }

    pub fn for_photo(mut self, photo_id: impl Into<String>) -> Self {
        self.photo_id = Some(photo_id.into());
        self
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&FetchError> for ErrorReport {
    fn from(err: &FetchError) -> Self {
        let (kind, message) = match err {
            FetchError::Remote { .. } => (ErrorKind::Remote, "Invalid response from server"),
            FetchError::Schema(_) => (ErrorKind::Schema, "Invalid response format from server"),
            FetchError::Transport(_) => (ErrorKind::Transport, "Failed to fetch album"),
        };
        ErrorReport::new(kind, FailureStage::Sync, message)
    }
}

impl From<&ResolveError> for ErrorReport {
    fn from(err: &ResolveError) -> Self {
        let kind = match err {
            ResolveError::Remote { .. } => ErrorKind::Remote,
            ResolveError::ContentType { .. } => ErrorKind::ContentType,
            ResolveError::Transport(_) => ErrorKind::Transport,
            ResolveError::Cache(_) => ErrorKind::Filesystem,
        };
        ErrorReport::new(kind, FailureStage::Resolve, "Failed to prepare image")
    }
}

impl From<RotationError> for ErrorReport {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::NoPhotos => {
                ErrorReport::new(ErrorKind::NoPhotos, FailureStage::Sync, err.to_string())
            }
        }
    }
}
