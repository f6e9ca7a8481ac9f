//! In-process stand-in for the photo API used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::{Value, json};

#[derive(Debug)]
pub struct MockState {
    pub album: Mutex<Value>,
    pub status: AtomicU16,
    pub delay_ms: AtomicU64,
    pub image_delay_ms: AtomicU64,
    /// (download, preview); empty strings are not sent.
    pub tokens: Mutex<(String, String)>,
    pub album_hits: AtomicUsize,
    pub image_hits: AtomicUsize,
    pub last_query: Mutex<HashMap<String, String>>,
    pub last_headers: Mutex<HeaderMap>,
}

pub struct MockServer {
    pub base: String,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start(album: Value) -> Self {
        let state = Arc::new(MockState {
            album: Mutex::new(album),
            status: AtomicU16::new(200),
            delay_ms: AtomicU64::new(0),
            image_delay_ms: AtomicU64::new(0),
            tokens: Mutex::new(("dl-tok".to_string(), "pv-tok".to_string())),
            album_hits: AtomicUsize::new(0),
            image_hits: AtomicUsize::new(0),
            last_query: Mutex::new(HashMap::new()),
            last_headers: Mutex::new(HeaderMap::new()),
        });
        let app = Router::new()
            .route("/api/v1/photos", get(photos))
            .route("/api/v1/t/{hash}/{token}/{size}", get(thumbnail))
            .route("/api/v1/dl/{hash}", get(download))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn fail_with(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn set_album(&self, album: Value) {
        *self.state.album.lock().unwrap() = album;
    }

    pub fn set_tokens(&self, download: &str, preview: &str) {
        *self.state.tokens.lock().unwrap() = (download.to_string(), preview.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delays image responses; the hit is counted before the wait.
    pub fn set_image_delay(&self, delay: Duration) {
        self.state
            .image_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn album_hits(&self) -> usize {
        self.state.album_hits.load(Ordering::SeqCst)
    }

    pub fn image_hits(&self) -> usize {
        self.state.image_hits.load(Ordering::SeqCst)
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.state
            .last_headers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn last_query(&self) -> HashMap<String, String> {
        self.state.last_query.lock().unwrap().clone()
    }
}

/// Album entry with a single primary file.
pub fn photo(uid: &str, hash: &str, title: &str) -> Value {
    json!({
        "UID": uid,
        "Title": title,
        "TakenAt": "2022-03-04T05:06:07Z",
        "Files": [{"Hash": hash, "Name": format!("{uid}.jpg"), "FileType": "jpg", "Primary": true}]
    })
}

pub fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbaImage::new(3, 2)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

async fn photos(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.album_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock().unwrap() = query;
    *state.last_headers.lock().unwrap() = headers;

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();
    if !status.is_success() {
        return (status, "upstream exploded").into_response();
    }

    let album = state.album.lock().unwrap().clone();
    let (download, preview) = state.tokens.lock().unwrap().clone();
    let mut response = axum::Json(album).into_response();
    if !download.is_empty() {
        response
            .headers_mut()
            .insert("x-download-token", download.parse().unwrap());
    }
    if !preview.is_empty() {
        response
            .headers_mut()
            .insert("x-preview-token", preview.parse().unwrap());
    }
    response
}

async fn thumbnail(
    State(state): State<Arc<MockState>>,
    Path((hash, _token, _size)): Path<(String, String, String)>,
) -> Response {
    image_response(&state, &hash).await
}

async fn download(State(state): State<Arc<MockState>>, Path(hash): Path<String>) -> Response {
    image_response(&state, &hash).await
}

async fn image_response(state: &MockState, hash: &str) -> Response {
    state.image_hits.fetch_add(1, Ordering::SeqCst);
    let delay = state.image_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if hash.starts_with("html") {
        return (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<html>sign in</html>",
        )
            .into_response();
    }
    if hash.starts_with("missing") {
        return StatusCode::NOT_FOUND.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], png_bytes()).into_response()
}
