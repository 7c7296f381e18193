//! Per-source metadata cache
//!
//! Each source owns one `<SourceID>.bin` file inside the destination's
//! cache directory: a headerless stream of records terminated by EOF.
//!
//! Record layout, all integers little-endian:
//!
//! ```text
//! u32 path_len | path bytes | u64 size | u64 mtime | 16 bytes hash
//! | u8 visited | i32 miss_count
//! ```

use crate::cache::{read_i32, read_u32_or_eof, read_u64, read_u8};
use crate::error::{IoResultExt, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Longest path accepted when loading a cache file. Anything larger means
/// the stream is corrupt, not a real path.
const MAX_PATH_LEN: u32 = 4096;

/// One cached file observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path of the file, unique within one source's cache
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub mtime: u64,
    /// Truncated BLAKE3 fingerprint of `(path, size, mtime)`
    pub hash: [u8; 16],
    /// Seen during the current scan cycle
    pub visited: bool,
    /// Consecutive cycles the file was not seen
    pub miss_count: i32,
}

impl FileRecord {
    /// A fresh record for a just-scanned file; the hash is filled in later
    /// by the hasher.
    pub fn new(path: String, size: u64, mtime: u64) -> Self {
        Self {
            path,
            size,
            mtime,
            hash: [0u8; 16],
            visited: false,
            miss_count: 0,
        }
    }
}

/// In-memory view of one source's cache file, guarded by a mutex so copy
/// engine callbacks and the decider can share it.
#[derive(Debug)]
pub struct MetaCache {
    cache_dir: PathBuf,
    entries: Mutex<HashMap<String, FileRecord>>,
}

impl MetaCache {
    /// Create an empty cache bound to the destination cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn bin_path(&self, source_id: u32) -> PathBuf {
        self.cache_dir.join(format!("{source_id}.bin"))
    }

    /// Load `<source_id>.bin` into memory, replacing current entries.
    ///
    /// A missing file is a fresh start, not an error. A malformed file
    /// aborts the load.
    pub fn load(&self, source_id: u32) -> Result<usize> {
        let path = self.bin_path(source_id);
        let mut entries = self.entries.lock().unwrap();
        entries.clear();

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no cache file at {}, starting fresh", path.display());
                return Ok(0);
            }
            Err(e) => return Err(SyncError::io(&path, e)),
        };
        let mut reader = BufReader::new(file);

        while let Some(path_len) = read_u32_or_eof(&mut reader).with_path(&path)? {
            if path_len == 0 || path_len > MAX_PATH_LEN {
                return Err(SyncError::cache_format(
                    &path,
                    format!("invalid path length {path_len}"),
                ));
            }

            let mut path_bytes = vec![0u8; path_len as usize];
            reader.read_exact(&mut path_bytes).with_path(&path)?;
            let record_path = String::from_utf8_lossy(&path_bytes).into_owned();

            let size = read_u64(&mut reader).with_path(&path)?;
            let mtime = read_u64(&mut reader).with_path(&path)?;
            let mut hash = [0u8; 16];
            reader.read_exact(&mut hash).with_path(&path)?;
            let visited = read_u8(&mut reader).with_path(&path)? != 0;
            let miss_count = read_i32(&mut reader).with_path(&path)?;

            entries.insert(
                record_path.clone(),
                FileRecord {
                    path: record_path,
                    size,
                    mtime,
                    hash,
                    visited,
                    miss_count,
                },
            );
        }

        tracing::info!("loaded {} cache entries from {}", entries.len(), path.display());
        Ok(entries.len())
    }

    /// Truncate and rewrite `<source_id>.bin` from the in-memory entries.
    pub fn save(&self, source_id: u32) -> Result<()> {
        let path = self.bin_path(source_id);
        std::fs::create_dir_all(&self.cache_dir).with_path(&self.cache_dir)?;

        let entries = self.entries.lock().unwrap();
        let file = File::create(&path).with_path(&path)?;
        let mut writer = BufWriter::new(file);

        for record in entries.values() {
            writer
                .write_all(&(record.path.len() as u32).to_le_bytes())
                .with_path(&path)?;
            writer.write_all(record.path.as_bytes()).with_path(&path)?;
            writer.write_all(&record.size.to_le_bytes()).with_path(&path)?;
            writer.write_all(&record.mtime.to_le_bytes()).with_path(&path)?;
            writer.write_all(&record.hash).with_path(&path)?;
            writer
                .write_all(&[u8::from(record.visited)])
                .with_path(&path)?;
            writer
                .write_all(&record.miss_count.to_le_bytes())
                .with_path(&path)?;
        }
        writer.flush().with_path(&path)?;

        tracing::info!("saved {} cache entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Whether a record exists for `path`.
    pub fn has(&self, path: &str) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    /// Clone of the record for `path`, if present.
    pub fn get(&self, path: &str) -> Option<FileRecord> {
        self.entries.lock().unwrap().get(path).cloned()
    }

    /// Insert or replace the record for `record.path`, forcing
    /// `visited = true` and `miss_count = 0`.
    pub fn update(&self, record: FileRecord) {
        let mut entries = self.entries.lock().unwrap();
        let mut record = record;
        record.visited = true;
        record.miss_count = 0;
        entries.insert(record.path.clone(), record);
    }

    /// Mark `path` as seen this cycle. No-op if the path is unknown.
    pub fn mark_visited(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(record) = entries.get_mut(path) {
            record.visited = true;
            record.miss_count = 0;
        }
    }

    /// One eviction pass, run exactly once per source per run after all
    /// updates for the current scan.
    ///
    /// Visited entries have their flag and miss count reset for the next
    /// run; unvisited entries age, and are dropped once `miss_count`
    /// exceeds `max_miss`. The evicted paths are returned so the caller can
    /// delete the destination copies when configured to.
    pub fn remove_stale(&self, max_miss: i32) -> Vec<String> {
        let mut entries = self.entries.lock().unwrap();
        let mut evicted = Vec::new();

        entries.retain(|path, record| {
            if record.visited {
                record.visited = false;
                record.miss_count = 0;
                return true;
            }
            record.miss_count += 1;
            if record.miss_count > max_miss {
                tracing::info!("evicting stale cache entry: {path}");
                evicted.push(path.clone());
                false
            } else {
                true
            }
        });

        evicted
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Snapshot of all records, for inspection and tests.
    pub fn all_entries(&self) -> HashMap<String, FileRecord> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, size: u64, mtime: u64) -> FileRecord {
        let mut r = FileRecord::new(path.to_string(), size, mtime);
        r.hash = crate::hash::fingerprint(path, size, mtime);
        r
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = MetaCache::new(dir.path());

        cache.update(record("/data/a.txt", 10, 111));
        cache.update(record("/data/b.txt", 20, 222));
        cache.save(1).unwrap();

        let reloaded = MetaCache::new(dir.path());
        assert_eq!(reloaded.load(1).unwrap(), 2);
        assert_eq!(cache.all_entries(), reloaded.all_entries());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = MetaCache::new(dir.path());
        assert_eq!(cache.load(42).unwrap(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_path_length() {
        let dir = TempDir::new().unwrap();
        // path_len = 0 is never valid
        std::fs::write(dir.path().join("3.bin"), 0u32.to_le_bytes()).unwrap();

        let cache = MetaCache::new(dir.path());
        assert!(matches!(
            cache.load(3),
            Err(SyncError::CacheFormat { .. })
        ));
    }

    #[test]
    fn test_update_forces_visited() {
        let cache = MetaCache::new("unused");
        let mut r = record("/data/a.txt", 10, 111);
        r.visited = false;
        r.miss_count = 3;

        cache.update(r);
        let stored = cache.get("/data/a.txt").unwrap();
        assert!(stored.visited);
        assert_eq!(stored.miss_count, 0);
    }

    #[test]
    fn test_mark_visited_unknown_path_is_noop() {
        let cache = MetaCache::new("unused");
        cache.mark_visited("/not/there");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_eviction_after_threshold() {
        let cache = MetaCache::new("unused");
        cache.update(record("/data/gone.txt", 10, 111));

        // Entry present after k unvisited passes, gone after k+1.
        let max_miss = 2;
        for pass in 1..=max_miss {
            let evicted = cache.remove_stale(max_miss);
            assert!(evicted.is_empty(), "evicted too early on pass {pass}");
            assert!(cache.has("/data/gone.txt"));
        }
        let evicted = cache.remove_stale(max_miss);
        assert_eq!(evicted, vec!["/data/gone.txt".to_string()]);
        assert!(!cache.has("/data/gone.txt"));
    }

    #[test]
    fn test_visit_resets_aging() {
        let cache = MetaCache::new("unused");
        cache.update(record("/data/a.txt", 10, 111));

        cache.remove_stale(5);
        cache.remove_stale(5);
        let aged = cache.get("/data/a.txt").unwrap();
        assert_eq!(aged.miss_count, 2);

        cache.mark_visited("/data/a.txt");
        assert_eq!(cache.get("/data/a.txt").unwrap().miss_count, 0);

        // The next pass clears the flag but keeps the entry young.
        cache.remove_stale(5);
        let after = cache.get("/data/a.txt").unwrap();
        assert!(!after.visited);
        assert_eq!(after.miss_count, 0);
    }
}
