//! Disk persistence for the report cache.
//!
//! The snapshot is a single JSON file written atomically (temp file +
//! rename) so readers and a crashed writer can never observe a partial
//! snapshot. Expiries are stored as UNIX seconds; entries already expired
//! at load time are dropped.

use crate::{Entry, SharedCache};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{info, warn};

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    value: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

fn to_unix(at: SystemTime) -> Option<u64> {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

fn from_unix(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

pub(crate) fn write(path: &Path, entries: &HashMap<String, Entry>) -> Result<()> {
    let mut records: Vec<SnapshotEntry> = entries
        .iter()
        .map(|(key, entry)| SnapshotEntry {
            key: key.clone(),
            value: entry.value.clone(),
            expires_at: entry.expires_at.and_then(to_unix),
        })
        .collect();
    records.sort_by(|a, b| a.key.cmp(&b.key));

    let bytes = serde_json::to_vec(&records).context("Failed to serialize cache snapshot")?;
    atomic_write(path, &bytes)
}

pub(crate) fn read(path: &Path) -> Result<HashMap<String, Entry>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read cache snapshot {}", path.display()))?;
    let records: Vec<SnapshotEntry> =
        serde_json::from_slice(&bytes).context("Failed to parse cache snapshot")?;

    let now = SystemTime::now();
    let entries = records
        .into_iter()
        .map(|r| {
            let entry = Entry {
                value: r.value,
                expires_at: r.expires_at.map(from_unix),
            };
            (r.key, entry)
        })
        .filter(|(_, entry)| !entry.is_expired(now))
        .collect();
    Ok(entries)
}

/// Writes `content` to a temporary file in the target's directory, then
/// renames it into place. Readers see either the old snapshot or the new
/// one, never a truncated file.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    std::fs::write(tmp.path(), content)
        .with_context(|| format!("Failed to write temp file {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to persist snapshot to {}", path.display()))?;
    Ok(())
}

/// Persists the cache on a fixed interval and once more, best effort, when
/// the process drains.
pub async fn persist(
    cache: SharedCache,
    path: PathBuf,
    interval: Duration,
    drain: drain::Watch,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // An interval's first tick fires immediately; skip it so the first
    // snapshot lands one full period after startup.
    timer.tick().await;

    let shutdown = drain.signaled();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let Err(error) = cache.save(&path) {
                    warn!(%error, path = %path.display(), "Failed to persist report cache");
                }
            }
            release = &mut shutdown => {
                match cache.save(&path) {
                    Ok(()) => info!(path = %path.display(), "Flushed report cache on shutdown"),
                    Err(error) => {
                        warn!(%error, path = %path.display(), "Failed to flush report cache on shutdown")
                    }
                }
                drop(release);
                return;
            }
        }
    }
}
