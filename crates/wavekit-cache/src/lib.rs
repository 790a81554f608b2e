//! # WaveKit Cache
//!
//! Named response cache containers for the WaveKit service worker runtime.
//!
//! ## Features
//!
//! - **Containers**: named, lazily created, in-memory
//! - **Request identity keys**: method + fragment-stripped URL
//! - **Batch commits**: a pre-fetched set becomes visible all at once
//! - **Ordered matching**: storage-wide lookup walks containers in
//!   creation order
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (named containers, creation-ordered)
//!     └── Cache
//!             └── ResourceKey (method + URL) → CachedResponse
//! ```
//!
//! No entry here ever expires or is revalidated; whatever was captured is
//! served as-is until overwritten or deleted. Containers live in memory:
//! durable storage belongs to the embedding host, not this crate.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

// ==================== Request Identity ====================

/// The identity a cached response is stored and looked up under:
/// HTTP method plus URL with any fragment stripped (fragments never
/// reach the network, so they must not split cache identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    method: String,
    url: String,
}

impl ResourceKey {
    /// Build a key from a method and URL.
    pub fn new(method: impl AsRef<str>, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Build a GET key, the identity of every pre-cached asset.
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    /// The normalized (uppercase) method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The fragment-stripped URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Cached Response ====================

/// A full captured response: status, headers, and body, plus the identity
/// it was stored under and the capture timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Request URL (fragment-stripped).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, names lowercased as captured off the wire.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Capture time (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Capture a response under the given identity.
    pub fn new(
        key: &ResourceKey,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: key.url().to_string(),
            method: key.method().to_string(),
            status,
            headers,
            body,
            cached_at: now_ms(),
        }
    }

    /// The identity this entry is stored under.
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Get a captured header by its lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ==================== Cache ====================

/// One named container of captured responses.
#[derive(Debug, Default)]
pub struct Cache {
    /// Container name.
    pub name: String,

    /// Entries by request identity.
    entries: HashMap<ResourceKey, CachedResponse>,
}

impl Cache {
    /// Create an empty container.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Look up an entry by request identity. No staleness or expiry check.
    pub fn match_request(&self, key: &ResourceKey) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    /// Insert or replace one entry under its own identity.
    pub fn put(&mut self, entry: CachedResponse) {
        trace!(cache = %self.name, key = %entry.key(), "Stored entry");
        self.entries.insert(entry.key(), entry);
    }

    /// Commit a pre-fetched batch as a set. Duplicate identities within the
    /// batch collapse to the last entry. Callers that need the batch to
    /// become visible atomically hold their storage lock across this call.
    pub fn put_batch(&mut self, entries: Vec<CachedResponse>) {
        debug!(cache = %self.name, count = entries.len(), "Committing batch");
        for entry in entries {
            self.entries.insert(entry.key(), entry);
        }
    }

    /// Remove an entry. Returns whether it existed.
    pub fn delete(&mut self, key: &ResourceKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All stored identities.
    pub fn keys(&self) -> Vec<&ResourceKey> {
        self.entries.keys().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The set of named containers. Creation order is preserved so that
/// storage-wide matching is deterministic when several containers hold
/// the same identity.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl CacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a container by name, creating it empty if absent. Re-opening
    /// an existing container preserves its entries.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        match self.caches.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                debug!(name, "Created cache container");
                self.order.push(name.to_string());
                v.insert(Cache::new(name))
            }
        }
    }

    /// Borrow a container without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Whether a container exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Drop a container and everything in it. Returns whether it existed.
    pub fn delete(&mut self, name: &str) -> bool {
        let removed = self.caches.remove(name).is_some();
        if removed {
            debug!(name, "Deleted cache container");
            self.order.retain(|n| n != name);
        }
        removed
    }

    /// Container names in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Look up a request identity across every container, in container
    /// creation order, returning the first match.
    pub fn match_request(&self, key: &ResourceKey) -> Option<&CachedResponse> {
        self.order
            .iter()
            .find_map(|name| self.caches.get(name).and_then(|c| c.match_request(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn entry_for(key: &ResourceKey, body: &str) -> CachedResponse {
        CachedResponse::new(key, 200, HashMap::new(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_key_strips_fragment() {
        let with_fragment = ResourceKey::get(&url("https://app.test/page#section"));
        let without = ResourceKey::get(&url("https://app.test/page"));
        assert_eq!(with_fragment, without);
        assert_eq!(with_fragment.url(), "https://app.test/page");
    }

    #[test]
    fn test_key_normalizes_method() {
        let lower = ResourceKey::new("get", &url("https://app.test/"));
        let upper = ResourceKey::new("GET", &url("https://app.test/"));
        assert_eq!(lower, upper);
        assert_eq!(lower.method(), "GET");
    }

    #[test]
    fn test_key_distinguishes_methods() {
        let get = ResourceKey::new("GET", &url("https://app.test/api"));
        let post = ResourceKey::new("POST", &url("https://app.test/api"));
        assert_ne!(get, post);
    }

    #[test]
    fn test_key_display() {
        let key = ResourceKey::get(&url("https://app.test/a.js"));
        assert_eq!(key.to_string(), "GET https://app.test/a.js");
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("assets");
        let key = ResourceKey::get(&url("https://app.test/styles.css"));
        cache.put(entry_for(&key, "body{}"));

        let hit = cache.match_request(&key).unwrap();
        assert_eq!(hit.body, b"body{}");
        assert_eq!(hit.status, 200);

        let other = ResourceKey::get(&url("https://app.test/other.css"));
        assert!(cache.match_request(&other).is_none());
    }

    #[test]
    fn test_cache_put_replaces() {
        let mut cache = Cache::new("assets");
        let key = ResourceKey::get(&url("https://app.test/app.js"));
        cache.put(entry_for(&key, "v1"));
        cache.put(entry_for(&key, "v2"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_request(&key).unwrap().body, b"v2");
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("assets");
        let key = ResourceKey::get(&url("https://app.test/a.js"));
        cache.put(entry_for(&key, "a"));

        assert!(cache.delete(&key));
        assert!(!cache.delete(&key));
        assert!(cache.match_request(&key).is_none());
    }

    #[test]
    fn test_put_batch_set_semantics() {
        let mut cache = Cache::new("assets");
        let root = ResourceKey::get(&url("https://app.test/"));
        let js = ResourceKey::get(&url("https://app.test/a.js"));
        cache.put_batch(vec![
            entry_for(&root, "index"),
            entry_for(&js, "js-old"),
            entry_for(&js, "js-new"),
        ]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.match_request(&js).unwrap().body, b"js-new");
    }

    #[test]
    fn test_empty_batch() {
        let mut cache = Cache::new("assets");
        cache.put_batch(Vec::new());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_header_access() {
        let key = ResourceKey::get(&url("https://app.test/a.js"));
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/javascript".to_string());
        let entry = CachedResponse::new(&key, 200, headers, Vec::new());

        assert_eq!(entry.header("content-type"), Some("text/javascript"));
        assert_eq!(entry.header("etag"), None);
    }

    #[test]
    fn test_storage_open_is_idempotent() {
        let mut storage = CacheStorage::new();
        let key = ResourceKey::get(&url("https://app.test/"));
        storage.open("v-assets").put(entry_for(&key, "index"));

        let reopened = storage.open("v-assets");
        assert_eq!(reopened.len(), 1);
        assert!(reopened.match_request(&key).is_some());
        assert_eq!(storage.keys(), vec!["v-assets".to_string()]);
    }

    #[test]
    fn test_storage_has_and_delete() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("assets"));

        storage.open("assets");
        assert!(storage.has("assets"));

        assert!(storage.delete("assets"));
        assert!(!storage.has("assets"));
        assert!(!storage.delete("assets"));
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn test_storage_keys_in_creation_order() {
        let mut storage = CacheStorage::new();
        storage.open("first");
        storage.open("second");
        storage.open("first");
        storage.open("third");

        assert_eq!(
            storage.keys(),
            vec![
                "first".to_string(),
                "second".to_string(),
                "third".to_string()
            ]
        );
    }

    #[test]
    fn test_storage_match_walks_containers_in_order() {
        let mut storage = CacheStorage::new();
        let key = ResourceKey::get(&url("https://app.test/shared.js"));
        storage.open("older").put(entry_for(&key, "from-older"));
        storage.open("newer").put(entry_for(&key, "from-newer"));

        let hit = storage.match_request(&key).unwrap();
        assert_eq!(hit.body, b"from-older");
    }

    #[test]
    fn test_storage_match_misses_cleanly() {
        let mut storage = CacheStorage::new();
        storage.open("assets");
        let key = ResourceKey::get(&url("https://app.test/nope"));
        assert!(storage.match_request(&key).is_none());
    }
}
