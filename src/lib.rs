//! Photo frame fed from a remote album.
//!
//! Two tasks talk over bounded channels: the helper side syncs album metadata, rotates
//! through the photos and resolves each into an image source; the display side loads
//! those sources, paces the slideshow and asks for the next photo.

pub mod album;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod resolver;
pub mod rotation;
pub mod schedule;
pub mod tokens;
pub mod tasks {
    pub mod display;
    pub mod helper;
}

use std::time::Duration;

/// HTTP client shared by album sync, cache downloads and the display loader.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}
