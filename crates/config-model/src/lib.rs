use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

pub use cache::CacheSettings;
pub use display::Viewport;

/// Placeholder used in place of a preview/download token when the server handed out none.
pub const PUBLIC_TOKEN: &str = "public";

/// Settings shared by the display side and the helper side.
///
/// The display side owns the file-backed copy and hands a clone to the helper with every
/// `CONFIG` message, so the helper never reads configuration on its own.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AlbumSettings {
    /// Server root, e.g. `http://photoprism.local:2342`.
    pub api_url: String,
    /// Album whose photos are rotated.
    pub album_id: String,
    /// API credential; empty means anonymous access.
    pub token: String,
    pub auth_method: AuthMethod,
    /// Period between album re-syncs.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,
    /// Cross-fade length used by the presentation layer.
    #[serde(with = "humantime_serde")]
    pub fade_speed: Duration,
    /// How long a loaded photo stays up before the display asks for the next one.
    #[serde(with = "humantime_serde")]
    pub slide_duration: Duration,
    /// Load retries (falling back to the download URL) before skipping a photo.
    pub max_retries: u32,
    /// Upper bound on the number of photos requested in the single album page.
    pub page_size: u32,
    pub selection: SelectionPolicy,
    pub use_thumbnails: bool,
    pub thumbnail_size: ThumbnailSize,
    pub preload_in_browser: bool,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub cache: CacheSettings,
    /// Display geometry reported by the display side.
    pub viewport: Viewport,
}

impl Default for AlbumSettings {
    fn default() -> Self {
        Self {
            api_url: "http://photoprism.local:2342".to_string(),
            album_id: String::new(),
            token: String::new(),
            auth_method: AuthMethod::default(),
            update_interval: Duration::from_secs(5 * 60),
            fade_speed: Duration::from_secs(1),
            slide_duration: Duration::from_secs(60),
            max_retries: 2,
            page_size: 1000,
            selection: SelectionPolicy::default(),
            use_thumbnails: true,
            thumbnail_size: ThumbnailSize::default(),
            preload_in_browser: true,
            request_timeout: Duration::from_secs(30),
            cache: CacheSettings::default(),
            viewport: Viewport::default(),
        }
    }
}

impl AlbumSettings {
    /// Base of every API route: `{api-url}/api/v1`.
    pub fn api_base(&self) -> String {
        format!("{}/api/v1", self.api_url.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.album_id.trim().is_empty(), "album-id must not be empty");
        ensure!(
            self.api_url.starts_with("http://") || self.api_url.starts_with("https://"),
            "api-url must be an http(s) URL, got {:?}",
            self.api_url
        );
        ensure!(
            !self.update_interval.is_zero(),
            "update-interval must be positive"
        );
        ensure!(
            !self.slide_duration.is_zero(),
            "slide-duration must be positive"
        );
        ensure!(
            !self.request_timeout.is_zero(),
            "request-timeout must be positive"
        );
        ensure!(self.page_size > 0, "page-size must be greater than zero");
        if let ThumbnailSize::Fixed(size) = &self.thumbnail_size {
            ensure!(
                !size.trim().is_empty() && !size.contains('/'),
                "thumbnail-size must be 'auto' or a size name like 'fit_1920'"
            );
        }
        self.cache.validate()?;
        self.viewport.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// `Authorization: Bearer {token}`
    #[default]
    Bearer,
    /// `X-Auth-Token: {token}`
    XAuthToken,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Oldest-first walk through the album, wrapping at the end.
    #[default]
    Sequential,
    /// Uniform pick that never repeats the current photo when there is a choice.
    Random,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ThumbnailSize {
    /// Pick the size from the display viewport.
    #[default]
    Auto,
    Fixed(String),
}

impl From<String> for ThumbnailSize {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            ThumbnailSize::Auto
        } else {
            ThumbnailSize::Fixed(trimmed.to_string())
        }
    }
}

mod cache {
    use super::*;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct CacheSettings {
        /// Download images into `dir` and hand out local paths instead of remote URLs.
        pub enabled: bool,
        pub dir: PathBuf,
        /// Prefix under which the display side addresses files in `dir`.
        pub public_mount: String,
        /// Cached files older than this are removed on every fetch cycle.
        #[serde(with = "humantime_serde")]
        pub retention: Duration,
    }

    impl Default for CacheSettings {
        fn default() -> Self {
            Self {
                enabled: false,
                dir: PathBuf::from("/var/cache/prism-frame"),
                public_mount: "/cache".to_string(),
                retention: Duration::from_secs(24 * 60 * 60),
            }
        }
    }

    impl CacheSettings {
        pub fn validate(&self) -> Result<()> {
            if !self.enabled {
                return Ok(());
            }
            ensure!(
                !self.dir.as_os_str().is_empty(),
                "cache.dir must not be empty when the cache is enabled"
            );
            ensure!(
                !self.retention.is_zero(),
                "cache.retention must be positive"
            );
            Ok(())
        }
    }
}

mod display {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct Viewport {
        pub width: u32,
        pub height: u32,
        pub device_pixel_ratio: f64,
    }

    impl Default for Viewport {
        fn default() -> Self {
            Self {
                width: 1920,
                height: 1080,
                device_pixel_ratio: 1.0,
            }
        }
    }

    impl Viewport {
        /// Longest edge in physical pixels.
        pub fn max_pixels(&self) -> f64 {
            f64::from(self.width.max(self.height)) * self.device_pixel_ratio
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(
                self.width > 0 && self.height > 0,
                "viewport width and height must be greater than zero"
            );
            ensure!(
                self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0,
                "viewport.device-pixel-ratio must be a positive number"
            );
            Ok(())
        }
    }
}
