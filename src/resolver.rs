//! Turns a selected photo record into an image the display can load.
//!
//! Remote mode hands out thumbnail or direct-download URLs and does no I/O. Local-cache
//! mode downloads the bytes once per content hash and size, stores them through
//! [`CacheStore`] and hands out a cached file. Both modes attach a direct-download URL as retry fallback.

use config_model::{AlbumSettings, ThumbnailSize, Viewport};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::error::{CacheError, ResolveError};
use crate::events::{ImageDescriptor, ImageSource, PhotoRecord};
use crate::tokens::AccessTokens;

/// Sizes the thumbnail endpoint serves as `fit_{n}`, ascending.
pub const THUMBNAIL_SIZES: [u32; 10] = [720, 1280, 1600, 1920, 2048, 2560, 3840, 4096, 5120, 7680];

const UNTITLED: &str = "Untitled";

/// Smallest catalog size covering the viewport's longest edge, else the largest size.
pub fn select_fit_size(viewport: &Viewport) -> u32 {
    let needed = viewport.max_pixels().ceil();
    THUMBNAIL_SIZES
        .iter()
        .copied()
        .find(|&size| f64::from(size) >= needed)
        .unwrap_or(THUMBNAIL_SIZES[THUMBNAIL_SIZES.len() - 1])
}

pub fn thumbnail_size_name(size: &ThumbnailSize, viewport: &Viewport) -> String {
    match size {
        ThumbnailSize::Fixed(name) => name.clone(),
        ThumbnailSize::Auto => format!("fit_{}", select_fit_size(viewport)),
    }
}

pub fn thumbnail_url(api_base: &str, file_hash: &str, tokens: &AccessTokens, size: &str) -> String {
    format!(
        "{api_base}/t/{file_hash}/{token}/{size}",
        token = tokens.thumbnail_token()
    )
}

pub fn download_url(api_base: &str, file_hash: &str, tokens: &AccessTokens) -> String {
    format!(
        "{api_base}/dl/{file_hash}?t={token}",
        token = tokens.download_token()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Remote,
    LocalCache,
}

#[derive(Debug, Clone)]
pub struct ImageResolver {
    client: Client,
    cache: Option<CacheStore>,
}

impl ImageResolver {
    /// `cache` is `None` when local caching is unavailable for the whole process.
    pub fn new(client: Client, cache: Option<CacheStore>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    pub fn mode(&self, settings: &AlbumSettings) -> ResolveMode {
        if settings.cache.enabled && self.cache.is_some() {
            ResolveMode::LocalCache
        } else {
            ResolveMode::Remote
        }
    }

    pub async fn resolve(
        &self,
        photo: &PhotoRecord,
        tokens: &AccessTokens,
        settings: &AlbumSettings,
    ) -> Result<ImageDescriptor, ResolveError> {
        let api_base = settings.api_base();
        let fallback = ImageSource::Remote {
            url: download_url(&api_base, &photo.file_hash, tokens),
        };

        let source = match (self.mode(settings), self.cache.as_ref()) {
            (ResolveMode::LocalCache, Some(cache)) => match cache.ensure_dir() {
                Ok(()) => {
                    let entry = self.cached_entry(cache, photo, tokens, settings).await?;
                    ImageSource::Cached {
                        public_path: cache.public_path(&entry),
                        file: entry.path,
                    }
                }
                Err(err) => {
                    warn!("cache unavailable this cycle, using remote URLs: {err}");
                    remote_source(&api_base, photo, tokens, settings)
                }
            },
            _ => remote_source(&api_base, photo, tokens, settings),
        };
        debug!(photo = %photo.id, %source, "resolved image");

        Ok(ImageDescriptor {
            photo_id: photo.id.clone(),
            file_hash: photo.file_hash.clone(),
            title: display_title(&photo.title),
            taken_at: photo.taken_at,
            source,
            fallback,
        })
    }

    async fn cached_entry(
        &self,
        cache: &CacheStore,
        photo: &PhotoRecord,
        tokens: &AccessTokens,
        settings: &AlbumSettings,
    ) -> Result<CacheEntry, ResolveError> {
        let key = cache_key(photo, settings);
        let store = cache.clone();
        let lookup = key.clone();
        let hit = tokio::task::spawn_blocking(move || store.get(&lookup))
            .await
            .map_err(|err| CacheError::fs(cache.dir(), std::io::Error::other(err)))??;
        if let Some(entry) = hit {
            debug!(key = %entry.key, "cache hit");
            return Ok(entry);
        }

        let url = remote_url(&settings.api_base(), photo, tokens, settings);
        let bytes = self.download(&url).await?;

        let store = cache.clone();
        let entry = tokio::task::spawn_blocking(move || store.put(&key, &bytes))
            .await
            .map_err(|err| CacheError::fs(cache.dir(), std::io::Error::other(err)))??;
        debug!(key = %entry.key, path = %entry.path.display(), "cached image");
        Ok(entry)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Remote {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase());
        let bytes = response.bytes().await?.to_vec();

        match content_type {
            Some(ct) if ct.starts_with("image/") => Ok(bytes),
            Some(ct) => Err(ResolveError::ContentType { content_type: ct }),
            None if image::guess_format(&bytes).is_ok() => Ok(bytes),
            None => Err(ResolveError::ContentType {
                content_type: "unknown".to_string(),
            }),
        }
    }
}

fn remote_url(
    api_base: &str,
    photo: &PhotoRecord,
    tokens: &AccessTokens,
    settings: &AlbumSettings,
) -> String {
    if settings.use_thumbnails {
        let size = thumbnail_size_name(&settings.thumbnail_size, &settings.viewport);
        thumbnail_url(api_base, &photo.file_hash, tokens, &size)
    } else {
        download_url(api_base, &photo.file_hash, tokens)
    }
}

/// Content hash plus the variant fetched, so each thumbnail size is cached on its own.
pub fn cache_key(photo: &PhotoRecord, settings: &AlbumSettings) -> String {
    let variant = if settings.use_thumbnails {
        thumbnail_size_name(&settings.thumbnail_size, &settings.viewport)
    } else {
        "dl".to_string()
    };
    photo
        .file_hash
        .chars()
        .chain(variant.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn remote_source(
    api_base: &str,
    photo: &PhotoRecord,
    tokens: &AccessTokens,
    settings: &AlbumSettings,
) -> ImageSource {
    ImageSource::Remote {
        url: remote_url(api_base, photo, tokens, settings),
    }
}

fn display_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(width: u32, height: u32, ratio: f64) -> Viewport {
        Viewport {
            width,
            height,
            device_pixel_ratio: ratio,
        }
    }

    fn tokens(download: Option<&str>, preview: Option<&str>) -> AccessTokens {
        AccessTokens {
            download: download.map(str::to_owned),
            preview: preview.map(str::to_owned),
        }
    }

    #[test]
    fn picks_smallest_size_covering_viewport() {
        assert_eq!(select_fit_size(&viewport(1920, 1080, 1.0)), 1920);
        assert_eq!(select_fit_size(&viewport(1080, 1920, 1.0)), 1920);
        assert_eq!(select_fit_size(&viewport(800, 600, 1.0)), 1280);
        assert_eq!(select_fit_size(&viewport(640, 480, 1.0)), 720);
        assert_eq!(select_fit_size(&viewport(1920, 1080, 2.0)), 3840);
        assert_eq!(select_fit_size(&viewport(1921, 1080, 1.0)), 2048);
        assert_eq!(select_fit_size(&viewport(1366, 768, 1.5)), 2560);
    }

    #[test]
    fn oversized_viewport_gets_largest_size() {
        assert_eq!(select_fit_size(&viewport(7681, 4320, 1.0)), 7680);
        assert_eq!(select_fit_size(&viewport(5120, 2880, 2.0)), 7680);
    }

    #[test]
    fn explicit_size_wins_over_viewport() {
        let size = ThumbnailSize::Fixed("tile_500".to_string());
        assert_eq!(thumbnail_size_name(&size, &viewport(4000, 4000, 2.0)), "tile_500");
        assert_eq!(
            thumbnail_size_name(&ThumbnailSize::Auto, &viewport(1280, 720, 1.0)),
            "fit_1280"
        );
    }

    #[test]
    fn thumbnail_urls_follow_token_precedence() {
        let base = "http://frame.local/api/v1";
        assert_eq!(
            thumbnail_url(base, "h1", &tokens(Some("d"), Some("p")), "fit_1920"),
            "http://frame.local/api/v1/t/h1/p/fit_1920"
        );
        assert_eq!(
            thumbnail_url(base, "h1", &tokens(Some("d"), None), "fit_1920"),
            "http://frame.local/api/v1/t/h1/d/fit_1920"
        );
        assert_eq!(
            thumbnail_url(base, "h1", &tokens(None, None), "fit_1920"),
            "http://frame.local/api/v1/t/h1/public/fit_1920"
        );
    }

    #[test]
    fn download_url_shape() {
        assert_eq!(
            download_url("http://x/api/v1", "abc", &tokens(Some("d"), Some("p"))),
            "http://x/api/v1/dl/abc?t=d"
        );
        assert_eq!(
            download_url("http://x/api/v1", "abc", &tokens(None, Some("p"))),
            "http://x/api/v1/dl/abc?t=public"
        );
    }

    #[test]
    fn cache_key_names_the_variant() {
        let photo = PhotoRecord {
            id: "p1".to_string(),
            file_hash: "ab12".to_string(),
            title: String::new(),
            taken_at: None,
            files: Vec::new(),
        };
        let mut settings = AlbumSettings {
            thumbnail_size: ThumbnailSize::Fixed("fit_720".to_string()),
            ..AlbumSettings::default()
        };
        assert_eq!(cache_key(&photo, &settings), "ab12fit720");
        settings.thumbnail_size = ThumbnailSize::Fixed("fit_2048".to_string());
        assert_eq!(cache_key(&photo, &settings), "ab12fit2048");
        settings.use_thumbnails = false;
        assert_eq!(cache_key(&photo, &settings), "ab12dl");
    }

    #[tokio::test]
    async fn remote_mode_needs_no_io() {
        let resolver = ImageResolver::new(Client::new(), None);
        let settings = AlbumSettings {
            api_url: "http://frame.local:2342/".to_string(),
            album_id: "a".to_string(),
            thumbnail_size: ThumbnailSize::Fixed("fit_720".to_string()),
            ..AlbumSettings::default()
        };
        let photo = PhotoRecord {
            id: "p1".to_string(),
            file_hash: "h1".to_string(),
            title: "  ".to_string(),
            taken_at: None,
            files: Vec::new(),
        };
        let descriptor = resolver
            .resolve(&photo, &tokens(Some("d"), Some("p")), &settings)
            .await
            .unwrap();
        assert_eq!(resolver.mode(&settings), ResolveMode::Remote);
        assert_eq!(descriptor.title, "Untitled");
        assert_eq!(
            descriptor.source,
            ImageSource::Remote {
                url: "http://frame.local:2342/api/v1/t/h1/p/fit_720".to_string()
            }
        );
        assert_eq!(
            descriptor.fallback,
            ImageSource::Remote {
                url: "http://frame.local:2342/api/v1/dl/h1?t=d".to_string()
            }
        );
    }
}
