use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use config_model::AlbumSettings;

use crate::error::ErrorReport;

/// One displayable album entry. `files` is never empty once a record leaves the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: String,
    /// Hash of the variant used for thumbnails, downloads and cache keys.
    pub file_hash: String,
    pub title: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub files: Vec<FileVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVariant {
    pub hash: String,
    pub name: String,
    pub file_type: String,
    pub primary: bool,
}

/// Where the display fetches image bytes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote {
        url: String,
    },
    Cached {
        /// File on the helper's disk.
        file: PathBuf,
        /// The same file as addressed under the cache's public mount.
        public_path: String,
    },
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Remote { url } => f.write_str(url),
            ImageSource::Cached { public_path, .. } => f.write_str(public_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub photo_id: String,
    pub file_hash: String,
    pub title: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub source: ImageSource,
    /// Direct download URL tried when `source` fails to load.
    pub fallback: ImageSource,
}

/// Display side -> helper side.
#[derive(Debug, Clone)]
pub enum ToHelper {
    /// Adopt these settings and run a fetch cycle.
    Config(Box<AlbumSettings>),
    /// Advance past the photo with this id.
    Next(Option<String>),
    /// Stop re-syncing and drop any in-flight cycle until the next `Config`.
    Suspend,
}

/// Helper side -> display side.
#[derive(Debug, Clone, PartialEq)]
pub enum ToDisplay {
    ImageReady(ImageDescriptor),
    Error(ErrorReport),
}

/// Control requests for the display task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    ToggleSuspend,
    Suspend,
    Resume,
}
