//! Local image cache keyed by content hash.
//!
//! Files are named `{key}-{stamp}.{ext}` where `stamp` is a per-store monotonic write
//! timestamp in milliseconds. A write removes every other file of the same key, so at most
//! one entry per key survives a successful `put`. Age-based eviction uses the filesystem
//! modification time and keeps entries whose age equals the retention exactly.

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::CacheError;

const FALLBACK_EXTENSION: &str = "img";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub created_at: SystemTime,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    public_mount: String,
    last_stamp: Arc<AtomicU64>,
}

impl CacheStore {
    /// Store rooted at `dir`; the directory is created on first use.
    pub fn new(dir: impl Into<PathBuf>, public_mount: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_mount: public_mount.into(),
            last_stamp: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Store rooted at `dir`, failing if the directory cannot be created right away.
    pub fn open(dir: impl Into<PathBuf>, public_mount: impl Into<String>) -> Result<Self, CacheError> {
        let store = Self::new(dir, public_mount);
        store.ensure_dir()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|err| CacheError::fs(&self.dir, err))
    }

    /// Address of a cached file under the public mount.
    pub fn public_path(&self, entry: &CacheEntry) -> String {
        let name = entry
            .path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default();
        format!("{}/{}", self.public_mount.trim_end_matches('/'), name)
    }

    /// Writes `bytes` as the new live entry for `key` and removes older entries of the key.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        validate_key(key)?;
        self.ensure_dir()?;

        let stamp = self.next_stamp();
        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or(FALLBACK_EXTENSION);
        let path = self.dir.join(format!("{key}-{stamp}.{extension}"));
        let partial = self.dir.join(format!(".{key}-{stamp}.partial"));

        fs::write(&partial, bytes).map_err(|err| CacheError::fs(&partial, err))?;
        if let Err(err) = fs::rename(&partial, &path) {
            if let Err(cleanup) = fs::remove_file(&partial) {
                warn!(path = %partial.display(), "failed to remove partial cache file: {cleanup}");
            }
            return Err(CacheError::fs(&path, err));
        }
        debug!(key, path = %path.display(), bytes = bytes.len(), "cache write");

        self.remove_superseded(key, stamp);

        Ok(CacheEntry {
            key: key.to_string(),
            path,
            created_at: UNIX_EPOCH + Duration::from_millis(stamp),
        })
    }

    /// Newest entry for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        validate_key(key)?;
        let newest = self
            .entries_for(key)?
            .into_iter()
            .max_by_key(|(stamp, _)| *stamp)
            .map(|(stamp, path)| CacheEntry {
                key: key.to_string(),
                path,
                created_at: UNIX_EPOCH + Duration::from_millis(stamp),
            });
        Ok(newest)
    }

    /// Removes every file older than `retention`.
    pub fn sweep(&self, retention: Duration) -> Result<SweepReport, CacheError> {
        self.sweep_at(retention, SystemTime::now())
    }

    pub fn sweep_at(&self, retention: Duration, now: SystemTime) -> Result<SweepReport, CacheError> {
        if !self.dir.exists() {
            return Ok(SweepReport::default());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("cache directory walk failed"));
                    return Err(CacheError::fs(&self.dir, source));
                }
                Err(err) => {
                    warn!("cache sweep skipped an entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata().map(|meta| meta.modified()) {
                Ok(Ok(modified)) => files.push((entry.into_path(), modified)),
                Ok(Err(err)) => warn!(path = %entry.path().display(), "cache sweep: no mtime: {err}"),
                Err(err) => warn!(path = %entry.path().display(), "cache sweep: metadata failed: {err}"),
            }
        }

        let mut report = SweepReport {
            scanned: files.len(),
            ..SweepReport::default()
        };
        for path in plan_sweep(files, now, retention) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "cache sweep removed file");
                    report.removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), "cache sweep failed to remove file: {err}");
                    report.failed += 1;
                }
            }
        }
        if report.removed > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                retention = %humantime::format_duration(retention),
                "cache sweep complete"
            );
        }
        Ok(report)
    }

    fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut last = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_stamp.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    fn entries_for(&self, key: &str) -> Result<Vec<(u64, PathBuf)>, CacheError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CacheError::fs(&self.dir, err)),
        };
        let mut found = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(OsStr::to_str) else {
                continue;
            };
            if let Some((entry_key, stamp)) = parse_file_name(name) {
                if entry_key == key {
                    found.push((stamp, path));
                }
            }
        }
        Ok(found)
    }

    fn remove_superseded(&self, key: &str, live_stamp: u64) {
        let stale = match self.entries_for(key) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(key, "cache supersession scan failed: {err}");
                return;
            }
        };
        for (stamp, path) in stale {
            if stamp == live_stamp {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(key, path = %path.display(), "removed superseded cache entry"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(key, path = %path.display(), "failed to remove superseded cache entry: {err}"),
            }
        }
    }
}

/// Files whose age is strictly greater than `retention`.
pub fn plan_sweep(files: Vec<(PathBuf, SystemTime)>, now: SystemTime, retention: Duration) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|(_, modified)| now.duration_since(*modified).unwrap_or_default() > retention)
        .map(|(path, _)| path)
        .collect()
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Splits `{key}-{stamp}.{ext}` into key and stamp.
fn parse_file_name(name: &str) -> Option<(&str, u64)> {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let (key, stamp) = stem.rsplit_once('-')?;
    if key.is_empty() || key.starts_with('.') {
        return None;
    }
    Some((key, stamp.parse().ok()?))
}
