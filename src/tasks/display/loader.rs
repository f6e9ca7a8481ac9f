use std::io::Cursor;

use anyhow::{Context, Result, ensure};
use image::ImageFormat;
use reqwest::Client;
use tracing::debug;

use crate::events::ImageSource;

/// What a successful load produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// Fetches image bytes for the display and checks they decode as an image.
///
/// `preload` fetches ahead of time and keeps the bytes for the next `load` of the same
/// source. Only the most recent preload is kept.
#[derive(Debug)]
pub struct ImageLoader {
    client: Client,
    warm: Option<(ImageSource, Vec<u8>)>,
}

impl ImageLoader {
    pub fn new(client: Client) -> Self {
        Self { client, warm: None }
    }

    pub fn is_warm(&self, source: &ImageSource) -> bool {
        self.warm.as_ref().is_some_and(|(warm, _)| warm == source)
    }

    pub async fn preload(&mut self, source: &ImageSource) -> Result<()> {
        let bytes = self.fetch(source).await?;
        debug!(%source, bytes = bytes.len(), "preloaded");
        self.warm = Some((source.clone(), bytes));
        Ok(())
    }

    pub async fn load(&mut self, source: &ImageSource) -> Result<LoadedImage> {
        let bytes = match self.warm.take() {
            Some((warm, bytes)) if &warm == source => bytes,
            _ => self.fetch(source).await?,
        };
        inspect(&bytes).with_context(|| format!("{source} is not a displayable image"))
    }

    async fn fetch(&self, source: &ImageSource) -> Result<Vec<u8>> {
        match source {
            ImageSource::Remote { url } => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("requesting {url}"))?
                    .error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
            ImageSource::Cached { file, .. } => tokio::fs::read(file)
                .await
                .with_context(|| format!("reading {}", file.display())),
        }
    }
}

fn inspect(bytes: &[u8]) -> Result<LoadedImage> {
    ensure!(!bytes.is_empty(), "empty body");
    let reader = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().context("unrecognized image format")?;
    let (width, height) = reader.into_dimensions()?;
    Ok(LoadedImage {
        format,
        width,
        height,
        bytes: bytes.len(),
    })
}
