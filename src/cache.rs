//! Per-source dataset cache
//!
//! The cache is injected into the engine as a [`CacheStore`]. The file-backed
//! store keeps one JSON file per source and replaces it with a
//! write-to-temp-then-rename, so concurrent readers (including other
//! processes) never see a partially written entry.

use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Dataset;

/// Cached dataset plus the time it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    pub dataset: Dataset,
}

impl CacheEntry {
    pub fn new(source_id: impl Into<String>, fetched_at: DateTime<Utc>, dataset: Dataset) -> Self {
        Self {
            source_id: source_id.into(),
            fetched_at,
            dataset,
        }
    }

    /// Age at `now` (zero if the entry is from the future)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// `now - fetched_at < ttl`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

/// Storage for per-source cache entries
pub trait CacheStore: Send + Sync {
    /// Current entry for a source, if any readable one exists
    fn get(&self, source_id: &str) -> Option<CacheEntry>;

    /// Replace the entry for `entry.source_id` as a whole
    fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Remove the entry for a source; returns whether one existed
    fn remove(&self, source_id: &str) -> Result<bool>;
}

/// Source of "now" for cache freshness
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// =============================================================================
// File-backed store
// =============================================================================

/// One `<source>_cache.json` file per source under a directory
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Create the store, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file path for a source id
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{}_cache.json", file_stem(source_id)))
    }
}

/// Lowercase, with anything outside `[a-z0-9-]` replaced by `_`
fn file_stem(source_id: &str) -> String {
    source_id
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl CacheStore for FileCacheStore {
    fn get(&self, source_id: &str) -> Option<CacheEntry> {
        let path = self.path_for(source_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(source_id, path = %path.display(), error = %e, "Failed to read cache file");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.source_id == source_id => Some(entry),
            Ok(entry) => {
                warn!(
                    source_id,
                    found = %entry.source_id,
                    "Cache file belongs to a different source, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(source_id, path = %path.display(), error = %e, "Corrupt cache file, ignoring");
                None
            }
        }
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        let path = self.path_for(&entry.source_id);
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("Failed to create temporary cache file")?;

        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, entry).context("Failed to serialize cache entry")?;
            writer.flush().context("Failed to flush cache entry")?;
        }
        tmp.as_file()
            .sync_all()
            .context("Failed to sync cache entry")?;

        tmp.persist(&path)
            .with_context(|| format!("Failed to move cache entry into {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, source_id: &str) -> Result<bool> {
        let path = self.path_for(source_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-local store, for callers that do not want a disk cache
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, source_id: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(source_id).cloned()
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.source_id.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, source_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(source_id).is_some())
    }
}
