//! Response cache keyed by request URI and query string.
//!
//! The cache is an explicit collaborator handed to the client. `FileCache`
//! keeps entries on disk so a later run of the binary sees what an earlier
//! one fetched; `InMemoryCache` lives as long as its owner.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use super::model::EsiResponse;

pub trait ResponseCache: Send + Sync {
    fn set(&self, uri: &str, query: &str, response: &EsiResponse);

    /// Returns the stored response. Entries that have expired and carry no
    /// `ETag` cannot be revalidated and are evicted instead.
    fn get(&self, uri: &str, query: &str) -> Option<EsiResponse>;

    fn forget(&self, uri: &str, query: &str);

    fn has(&self, uri: &str, query: &str) -> bool;
}

static UNSAFE_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9/]").expect("valid path regex"));

/// `/v5/corporations/1/assets/` + `page=2` becomes
/// `_v5_corporations_1_assets_<sha256(page=2)>`.
pub fn cache_key(uri: &str, query: &str) -> String {
    let path = UNSAFE_PATH_CHARS.replace_all(uri, "").replace('/', "_");
    if query.is_empty() {
        return path;
    }
    format!("{}{}", path, hex::encode(Sha256::digest(query.as_bytes())))
}

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, EsiResponse>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, EsiResponse>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseCache for InMemoryCache {
    fn set(&self, uri: &str, query: &str, response: &EsiResponse) {
        self.lock().insert(cache_key(uri, query), response.clone());
    }

    fn get(&self, uri: &str, query: &str) -> Option<EsiResponse> {
        let key = cache_key(uri, query);
        let mut entries = self.lock();
        let entry = entries.get(&key)?;
        if entry.expired(Utc::now()) && entry.etag.is_none() {
            entries.remove(&key);
            return None;
        }
        Some(entry.clone())
    }

    fn forget(&self, uri: &str, query: &str) {
        self.lock().remove(&cache_key(uri, query));
    }

    fn has(&self, uri: &str, query: &str) -> bool {
        self.lock().contains_key(&cache_key(uri, query))
    }
}

/// One JSON file per cache key under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, uri: &str, query: &str) -> PathBuf {
        self.dir.join(format!("{}.json", cache_key(uri, query)))
    }

    fn write(&self, path: &Path, response: &EsiResponse) -> io::Result<()> {
        let bytes = serde_json::to_vec(response)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }

    fn read(&self, path: &Path) -> Option<EsiResponse> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "dropping unreadable cache entry");
                let _ = fs::remove_file(path);
                None
            }
        }
    }
}

impl ResponseCache for FileCache {
    fn set(&self, uri: &str, query: &str, response: &EsiResponse) {
        let path = self.path(uri, query);
        if let Err(err) = self.write(&path, response) {
            warn!(path = %path.display(), error = %err, "failed to write cache entry");
        }
    }

    fn get(&self, uri: &str, query: &str) -> Option<EsiResponse> {
        let path = self.path(uri, query);
        let entry = self.read(&path)?;
        if entry.expired(Utc::now()) && entry.etag.is_none() {
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(entry)
    }

    fn forget(&self, uri: &str, query: &str) {
        let _ = fs::remove_file(self.path(uri, query));
    }

    fn has(&self, uri: &str, query: &str) -> bool {
        self.path(uri, query).exists()
    }
}

/// Cache that never stores anything; every request goes to the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn set(&self, _uri: &str, _query: &str, _response: &EsiResponse) {}

    fn get(&self, _uri: &str, _query: &str) -> Option<EsiResponse> {
        None
    }

    fn forget(&self, _uri: &str, _query: &str) {}

    fn has(&self, _uri: &str, _query: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn response(expires_in: Duration, etag: Option<&str>) -> EsiResponse {
        EsiResponse::new(
            json!([{"item_id": 1}]),
            1,
            Some(Utc::now() + expires_in),
            etag.map(str::to_string),
        )
    }

    #[test]
    fn cache_key_strips_path_and_hashes_query() {
        assert_eq!(cache_key("/v4/characters/9-0/", ""), "_v4_characters_90_");
        let key = cache_key("/v4/characters/90/", "datasource=tranquility&page=1");
        assert!(key.starts_with("_v4_characters_90_"));
        assert_eq!(key.len(), "_v4_characters_90_".len() + 64);
        assert_ne!(key, cache_key("/v4/characters/90/", "datasource=tranquility&page=2"));
    }

    #[test]
    fn fresh_entries_are_returned() {
        let cache = InMemoryCache::new();
        cache.set("/v5/a/", "page=1", &response(Duration::minutes(5), None));
        assert!(cache.has("/v5/a/", "page=1"));
        assert!(cache.get("/v5/a/", "page=1").is_some());
        assert!(cache.get("/v5/a/", "page=2").is_none());
    }

    #[test]
    fn expired_without_etag_is_evicted() {
        let cache = InMemoryCache::new();
        cache.set("/v5/a/", "", &response(Duration::minutes(-1), None));
        assert!(cache.get("/v5/a/", "").is_none());
        assert!(!cache.has("/v5/a/", ""));
    }

    #[test]
    fn expired_with_etag_is_kept_for_revalidation() {
        let cache = InMemoryCache::new();
        cache.set("/v5/a/", "", &response(Duration::minutes(-1), Some("\"abc\"")));
        let hit = cache.get("/v5/a/", "").unwrap();
        assert_eq!(hit.etag.as_deref(), Some("\"abc\""));
        cache.forget("/v5/a/", "");
        assert!(cache.is_empty());
    }

    #[test]
    fn file_cache_entries_survive_reopening() {
        let td = tempfile::tempdir().unwrap();
        let stored = response(Duration::minutes(5), Some("\"v1\""));
        FileCache::open(td.path())
            .unwrap()
            .set("/v5/a/", "page=1", &stored);

        let reopened = FileCache::open(td.path()).unwrap();
        let hit = reopened.get("/v5/a/", "page=1").unwrap();
        assert_eq!(hit, stored);
        assert!(!hit.is_cached_load());
        assert!(reopened.has("/v5/a/", "page=1"));
        assert!(reopened.get("/v5/a/", "page=2").is_none());
    }

    #[test]
    fn file_cache_evicts_expired_entries_without_etag() {
        let td = tempfile::tempdir().unwrap();
        let cache = FileCache::open(td.path().join("nested")).unwrap();
        cache.set("/v5/a/", "", &response(Duration::minutes(-1), None));
        assert!(cache.get("/v5/a/", "").is_none());
        assert!(!cache.has("/v5/a/", ""));

        cache.set("/v5/b/", "", &response(Duration::minutes(-1), Some("\"x\"")));
        assert!(cache.get("/v5/b/", "").is_some());
        cache.forget("/v5/b/", "");
        assert!(!cache.has("/v5/b/", ""));
    }

    #[test]
    fn file_cache_drops_corrupt_entries() {
        let td = tempfile::tempdir().unwrap();
        let cache = FileCache::open(td.path()).unwrap();
        fs::write(td.path().join(format!("{}.json", cache_key("/v5/a/", ""))), b"{not json").unwrap();
        assert!(cache.get("/v5/a/", "").is_none());
        assert!(!cache.has("/v5/a/", ""));
    }

    #[test]
    fn no_cache_never_hits() {
        let cache = NoCache;
        cache.set("/v5/a/", "", &response(Duration::minutes(5), None));
        assert!(!cache.has("/v5/a/", ""));
    }
}
