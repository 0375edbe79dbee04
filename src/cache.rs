//! Client-side content cache.
//!
//! Keyed by logical file path. Each entry tracks the wall-clock time it was
//! last confirmed fresh against the server (`validation_ts`) and the
//! server-reported mtime at that confirmation (`modification_ts`). The
//! in-memory tables are authoritative: a file sitting on disk without a
//! matching in-memory record is treated as absent.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
struct Timestamps {
    validation_ts: u64,
    modification_ts: u32,
}

pub struct Cache {
    cache_dir: PathBuf,
    timestamps: HashMap<String, Timestamps>,
}

impl Cache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            timestamps: HashMap::new(),
        }
    }

    pub fn is_cached(&self, path: &str) -> bool {
        self.timestamps.contains_key(path)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.cache_dir.join(path)
    }

    /// Overwrites any prior entry for `path` and writes `bytes` to the
    /// backing cache directory.
    pub fn put(&mut self, path: &str, bytes: &[u8], validation_ts: u64, modification_ts: u32) -> Result<(), CacheError> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, bytes)?;
        self.timestamps.insert(
            path.to_string(),
            Timestamps {
                validation_ts,
                modification_ts,
            },
        );
        debug!(path, "cached file");
        Ok(())
    }

    /// Patches the on-disk content at `offset`. Does NOT refresh
    /// `validation_ts`/`modification_ts` — a later freshness check is still
    /// forced to consult the server once the freshness interval elapses.
    pub fn update_after_write(&mut self, path: &str, offset: u32, bytes: &[u8]) -> Result<(), CacheError> {
        use std::io::{Seek, SeekFrom, Write};
        let full_path = self.full_path(path);
        let mut file = fs::OpenOptions::new().write(true).open(&full_path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Appends to the on-disk content. Does NOT refresh timestamps.
    pub fn update_after_append(&mut self, path: &str, bytes: &[u8]) -> Result<(), CacheError> {
        use std::io::Write;
        let full_path = self.full_path(path);
        let mut file = fs::OpenOptions::new().append(true).open(&full_path)?;
        file.write_all(bytes)?;
        Ok(())
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        Ok(fs::read(self.full_path(path))?)
    }

    pub fn validation_ts(&self, path: &str) -> Option<u64> {
        self.timestamps.get(path).map(|t| t.validation_ts)
    }

    pub fn modification_ts(&self, path: &str) -> Option<u32> {
        self.timestamps.get(path).map(|t| t.modification_ts)
    }

    pub fn validate(&mut self, path: &str, now: u64) {
        if let Some(t) = self.timestamps.get_mut(path) {
            t.validation_ts = now;
        }
    }

    pub fn remove(&mut self, path: &str) -> Result<(), CacheError> {
        self.timestamps.remove(path);
        let full_path = self.full_path(path);
        if full_path.exists() {
            fs::remove_file(full_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (Cache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Cache::new(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn not_cached_until_put() {
        let (cache, _dir) = cache();
        assert!(!cache.is_cached("a.txt"));
    }

    #[test]
    fn put_then_read_round_trips_content() {
        let (mut cache, _dir) = cache();
        cache.put("a.txt", b"hello", 100, 5).unwrap();
        assert!(cache.is_cached("a.txt"));
        assert_eq!(cache.read("a.txt").unwrap(), b"hello");
        assert_eq!(cache.validation_ts("a.txt"), Some(100));
        assert_eq!(cache.modification_ts("a.txt"), Some(5));
    }

    #[test]
    fn update_after_write_patches_content_but_not_timestamps() {
        let (mut cache, _dir) = cache();
        cache.put("digits.txt", b"0123456789", 100, 5).unwrap();
        cache.update_after_write("digits.txt", 1, b"1234567890").unwrap();
        assert_eq!(cache.read("digits.txt").unwrap(), b"01234567890");
        assert_eq!(cache.validation_ts("digits.txt"), Some(100));
        assert_eq!(cache.modification_ts("digits.txt"), Some(5));
    }

    #[test]
    fn update_after_append_patches_content_but_not_timestamps() {
        let (mut cache, _dir) = cache();
        cache
            .put("appendme.txt", b"Hello? Is it me you're looking for?", 100, 5)
            .unwrap();
        cache.update_after_append("appendme.txt", b"a").unwrap();
        assert_eq!(cache.read("appendme.txt").unwrap(), b"Hello? Is it me you're looking for?a");
        assert_eq!(cache.modification_ts("appendme.txt"), Some(5));
    }

    #[test]
    fn validate_refreshes_validation_ts_only() {
        let (mut cache, _dir) = cache();
        cache.put("a.txt", b"x", 100, 5).unwrap();
        cache.validate("a.txt", 200);
        assert_eq!(cache.validation_ts("a.txt"), Some(200));
        assert_eq!(cache.modification_ts("a.txt"), Some(5));
    }

    #[test]
    fn remove_deletes_record_and_file() {
        let (mut cache, _dir) = cache();
        cache.put("a.txt", b"x", 100, 5).unwrap();
        cache.remove("a.txt").unwrap();
        assert!(!cache.is_cached("a.txt"));
        assert!(cache.read("a.txt").is_err());
    }
}
