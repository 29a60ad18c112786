//! In-process synthetic URLs.
//!
//! The playback host resolves `blob:domreel/N` URLs against this store the
//! way a browser resolves object URLs: the bytes live in memory, and a
//! revoked URL stops resolving. Placeholder URLs (empty bytes) exist so an
//! asset reference is *always* bound to something resolvable, even before
//! its bytes arrive.

use bytes::Bytes;
use rustc_hash::FxHashMap;

const SCHEME_PREFIX: &str = "blob:domreel/";

#[derive(Debug, Clone)]
pub struct ObjectUrlEntry {
    pub bytes: Bytes,
    pub mime: Option<String>,
}

#[derive(Default)]
pub struct ObjectUrlStore {
    entries: FxHashMap<String, ObjectUrlEntry>,
    next: u64,
}

impl ObjectUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a synthetic URL for the given bytes.
    pub fn create(&mut self, bytes: Bytes, mime: Option<String>) -> String {
        let url = format!("{SCHEME_PREFIX}{}", self.next);
        self.next += 1;
        self.entries.insert(url.clone(), ObjectUrlEntry { bytes, mime });
        url
    }

    /// Release a synthetic URL and its bytes. Unknown or foreign URLs are a
    /// no-op, so fallback (original) URLs can be passed through safely.
    pub fn revoke(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Resolve a synthetic URL to its bytes, as the host's loader would.
    pub fn get(&self, url: &str) -> Option<&ObjectUrlEntry> {
        self.entries.get(url)
    }

    pub fn is_synthetic(url: &str) -> bool {
        url.starts_with(SCHEME_PREFIX)
    }

    /// Number of URLs currently alive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
