//! TTL key/value cache between the Kubernetes API and the dashboard read
//! path.
//!
//! Each key's value is replaced wholesale, so readers observe either a prior
//! value or a fresher one, never a partial write. There is no atomicity
//! across keys: a read-then-write pair spanning two keys may interleave with
//! other writers. Entries without an expiry never expire (cluster metadata);
//! everything else carries a short TTL and is additionally invalidated by
//! watch events.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod keys;
mod snapshot;

pub use self::snapshot::persist;

use parking_lot::RwLock;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    value: Vec<u8>,
    /// `None` marks an entry that never expires.
    expires_at: Option<SystemTime>,
}

impl Entry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Shared handle to a [`ReportCache`].
pub type SharedCache = Arc<ReportCache>;

#[derive(Debug, Default)]
pub struct ReportCache {
    entries: RwLock<HashMap<String, Entry>>,

    hits: Counter,
    misses: Counter,
}

impl ReportCache {
    pub fn shared() -> SharedCache {
        Arc::new(Self::default())
    }

    /// Registers the cache's hit/miss counters.
    pub fn register_metrics(&self, prom: &mut Registry) {
        prom.register("cache_hits", "Count of report cache hits", self.hits.clone());
        prom.register(
            "cache_misses",
            "Count of report cache misses",
            self.misses.clone(),
        );
    }

    /// Returns the value stored under `key`, if present and unexpired.
    ///
    /// An expired entry is pruned and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = SystemTime::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.inc();
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.inc();
                    return None;
                }
            }
        }

        // Expired: escalate to a write lock to prune.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        self.misses.inc();
        None
    }

    /// Stores `value` under `key`. A `ttl` of `None` marks the entry as
    /// never expiring.
    pub fn set(&self, key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| SystemTime::now() + ttl);
        self.entries
            .write()
            .insert(key.into(), Entry { value, expires_at });
    }

    /// Removes every entry whose key starts with `prefix`, returning the
    /// number removed. Used by watch-driven invalidation.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(%prefix, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Drops expired entries.
    pub fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Loads a previous snapshot, replacing the in-memory contents. Expired
    /// entries are dropped on the way in.
    ///
    /// A missing or unreadable snapshot is a cold start, never fatal; the
    /// caller decides whether to log the error.
    pub fn load(&self, path: &Path) -> anyhow::Result<usize> {
        let loaded = snapshot::read(path)?;
        let count = loaded.len();
        *self.entries.write() = loaded;
        info!(path = %path.display(), entries = count, "Loaded report cache snapshot");
        Ok(count)
    }

    /// Persists the current contents, pruning expired entries first so the
    /// snapshot does not accumulate dead weight.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let swept = self.sweep();
        if swept > 0 {
            debug!(swept, "Swept expired entries before snapshot");
        }
        let entries = self.entries.read().clone();
        snapshot::write(path, &entries)?;
        debug!(path = %path.display(), entries = entries.len(), "Wrote report cache snapshot");
        Ok(())
    }

    /// Loads a snapshot if one exists, logging and ignoring failures.
    pub fn load_or_cold_start(&self, path: &Path) {
        if !path.exists() {
            info!(path = %path.display(), "No report cache snapshot; starting cold");
            return;
        }
        if let Err(error) = self.load(path) {
            warn!(%error, path = %path.display(), "Failed to load cache snapshot; starting cold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let cache = ReportCache::default();
        cache.set("k", b"v".to_vec(), Some(Duration::from_secs(60)));
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_are_misses_and_pruned() {
        let cache = ReportCache::default();
        cache.set("k", b"v".to_vec(), Some(Duration::from_secs(0)));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn never_expire_entries_survive_sweeps() {
        let cache = ReportCache::default();
        cache.set("clusters", b"[]".to_vec(), None);
        cache.set("dead", b"x".to_vec(), Some(Duration::from_secs(0)));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("clusters"), Some(b"[]".to_vec()));
    }

    #[test]
    fn overwrite_replaces_wholesale() {
        let cache = ReportCache::default();
        cache.set("k", b"old".to_vec(), None);
        cache.set("k", b"new".to_vec(), Some(Duration::from_secs(60)));
        assert_eq!(cache.get("k"), Some(b"new".to_vec()));
    }

    #[test]
    fn remove_prefix_scopes_to_prefix() {
        let cache = ReportCache::default();
        cache.set("reports/a/x", b"1".to_vec(), None);
        cache.set("reports/a/y", b"2".to_vec(), None);
        cache.set("reports/b/x", b"3".to_vec(), None);
        assert_eq!(cache.remove_prefix("reports/a/"), 2);
        assert_eq!(cache.get("reports/b/x"), Some(b"3".to_vec()));
        assert_eq!(cache.get("reports/a/x"), None);
    }
}
