//! Album metadata sync against the remote photo API.
//!
//! One sync is a single `GET {base}/photos` page holding the whole album, ordered
//! oldest-first so the rotation order is stable across restarts. The response headers
//! carry the short-lived preview/download tokens for the same cycle.

use chrono::{DateTime, Datelike, Utc};
use config_model::{AlbumSettings, AuthMethod};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::events::{FileVariant, PhotoRecord};
use crate::tokens::{AccessTokens, TokenStore};

const X_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");
const MAX_ERROR_BODY: usize = 512;

/// Result of one successful sync: the filtered photo list and the tokens that came with it.
#[derive(Debug, Clone)]
pub struct AlbumSnapshot {
    pub photos: Vec<PhotoRecord>,
    pub tokens: AccessTokens,
    /// Records dropped because they had no file variant.
    pub dropped: usize,
}

/// Queries the album endpoint and keeps the tokens of the latest committed sync.
#[derive(Debug)]
pub struct AlbumFetcher {
    client: Client,
    tokens: TokenStore,
}

impl AlbumFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tokens: TokenStore::new(),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Builds the request for one cycle. The returned value owns everything it needs, so
    /// the cycle can be awaited while the caller keeps handling other events.
    pub fn request(&self, settings: &AlbumSettings) -> AlbumRequest {
        AlbumRequest {
            client: self.client.clone(),
            url: format!("{}/photos", settings.api_base()),
            query: album_query(settings),
            auth: auth_header(settings),
        }
    }

    /// Stores the tokens of a snapshot, replacing whatever the previous cycle produced.
    pub fn commit(&mut self, snapshot: &AlbumSnapshot) -> u64 {
        self.tokens.replace(snapshot.tokens.clone())
    }

    /// Fetch and commit in one step.
    pub async fn sync(&mut self, settings: &AlbumSettings) -> Result<AlbumSnapshot, FetchError> {
        let snapshot = self.request(settings).send().await?;
        self.commit(&snapshot);
        Ok(snapshot)
    }
}

#[derive(Debug)]
pub struct AlbumRequest {
    client: Client,
    url: String,
    query: Vec<(&'static str, String)>,
    auth: Option<(HeaderName, HeaderValue)>,
}

impl AlbumRequest {
    pub async fn send(self) -> Result<AlbumSnapshot, FetchError> {
        debug!(url = %self.url, query = ?self.query, "requesting album");
        let mut request = self.client.get(&self.url).query(&self.query);
        if let Some((name, value)) = self.auth {
            request = request.header(name, value);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "album request rejected");
            return Err(FetchError::Remote {
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY),
            });
        }

        let tokens = AccessTokens::from_headers(response.headers());
        if tokens.is_degraded() {
            debug!(
                download = tokens.download.is_some(),
                preview = tokens.preview.is_some(),
                "album response lacks access tokens; falling back to public placeholder"
            );
        }

        let body = response.bytes().await?;
        let (photos, dropped) = parse_album(&body)?;
        info!(photos = photos.len(), dropped, "album synced");
        Ok(AlbumSnapshot {
            photos,
            tokens,
            dropped,
        })
    }
}

fn album_query(settings: &AlbumSettings) -> Vec<(&'static str, String)> {
    vec![
        ("count", settings.page_size.to_string()),
        ("offset", "0".to_string()),
        ("s", settings.album_id.clone()),
        ("merged", "true".to_string()),
        ("order", "oldest".to_string()),
    ]
}

fn auth_header(settings: &AlbumSettings) -> Option<(HeaderName, HeaderValue)> {
    let token = settings.token.trim();
    if token.is_empty() {
        return None;
    }
    let (name, raw) = match settings.auth_method {
        AuthMethod::Bearer => (AUTHORIZATION, format!("Bearer {token}")),
        AuthMethod::XAuthToken => (X_AUTH_TOKEN, token.to_string()),
    };
    match HeaderValue::from_str(&raw) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some((name, value))
        }
        Err(_) => {
            warn!("api token contains characters not allowed in a header; sending no credentials");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPhoto {
    #[serde(rename = "UID", default)]
    uid: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    taken_at: Option<String>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFile {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "Type")]
    file_type: String,
    #[serde(default)]
    primary: bool,
}

/// Parses an album body into displayable records, returning how many were dropped.
pub fn parse_album(body: &[u8]) -> Result<(Vec<PhotoRecord>, usize), FetchError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| FetchError::Schema(format!("body is not JSON: {err}")))?;
    let Value::Array(entries) = value else {
        return Err(FetchError::Schema(format!(
            "expected a list of photos, got {}",
            json_kind(&value)
        )));
    };

    let total = entries.len();
    let mut photos = Vec::with_capacity(total);
    for (index, entry) in entries.into_iter().enumerate() {
        let raw: RawPhoto = serde_json::from_value(entry)
            .map_err(|err| FetchError::Schema(format!("photo #{index}: {err}")))?;
        if let Some(record) = normalize(raw) {
            photos.push(record);
        }
    }
    let dropped = total - photos.len();
    Ok((photos, dropped))
}

fn normalize(raw: RawPhoto) -> Option<PhotoRecord> {
    let files: Vec<FileVariant> = raw
        .files
        .into_iter()
        .filter(|file| !file.hash.trim().is_empty())
        .map(|file| FileVariant {
            hash: file.hash,
            name: file.name,
            file_type: file.file_type,
            primary: file.primary,
        })
        .collect();
    let display_file = files.iter().find(|f| f.primary).or_else(|| files.first())?;
    let file_hash = display_file.hash.clone();

    let id = if raw.uid.trim().is_empty() {
        if raw.hash.trim().is_empty() {
            file_hash.clone()
        } else {
            raw.hash
        }
    } else {
        raw.uid
    };

    Some(PhotoRecord {
        id,
        file_hash,
        title: raw.title,
        taken_at: raw.taken_at.as_deref().and_then(parse_taken_at),
        files,
    })
}

fn parse_taken_at(value: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value).ok()?.with_timezone(&Utc);
    // The server uses year 1 for "unknown".
    (parsed.year() > 1).then_some(parsed)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut cut = max;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
