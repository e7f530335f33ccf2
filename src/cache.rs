use crate::catalog::FileEntry;
use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Archives below this are exempt from the size check; the feed rounds
/// sizes so aggressively that small files rarely match exactly.
const SMALL_FILE_BYTES: u64 = 2048;

/// A downloaded archive sitting in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub archive_id: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

/// On-disk archive cache. Entries are only ever removed by an explicit
/// clear; there is no automatic eviction.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    root: PathBuf,
}

impl ArchiveCache {
    pub fn open(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).context("create cache dir")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where this archive lives (or would live) in the cache. Keyed by the
    /// remote id: two catalog entries may publish the same display name,
    /// and they must never serve each other's bytes.
    pub fn entry_path(&self, file: &FileEntry) -> PathBuf {
        self.root.join(format!("{}-{}", file.remote_id, file.name))
    }

    /// Look the archive up by remote id + size. A present file whose size
    /// disagrees with the catalog is treated as a miss.
    pub fn lookup(&self, file: &FileEntry) -> Option<CacheEntry> {
        let path = self.entry_path(file);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let actual = metadata.len();
        if !size_matches(actual, file.size_bytes) {
            warn!(
                "cached {} has unexpected size ({actual} bytes), ignoring",
                file.name
            );
            return None;
        }
        Some(CacheEntry {
            archive_id: file.remote_id.clone(),
            local_path: path,
            size_bytes: actual,
        })
    }

    /// Drop a cached archive, e.g. after it fails an integrity test.
    pub fn evict(&self, file: &FileEntry) {
        let path = self.entry_path(file);
        if let Err(err) = fs::remove_file(&path) {
            warn!("evict {} failed: {err}", path.display());
        }
    }

    /// Delete every cached archive. User-triggered only.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_file() && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        info!("cleared {removed} cached archives");
        Ok(removed)
    }
}

/// The catalog's sizes come from a lossy human rendering, so downloads are
/// accepted within a 5% tolerance. Unknown sizes always match.
pub fn size_matches(actual: u64, expected: Option<u64>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    if expected < SMALL_FILE_BYTES {
        return actual > 0;
    }
    let tolerance = expected / 20;
    actual.abs_diff(expected) <= tolerance
}
