//! Stable path ⇄ identifier indexes
//!
//! One instance lives at the cache root keyed by destination path, another
//! inside each destination's cache directory keyed by source path. IDs are
//! assigned monotonically from 1 and never reused; the whole index is
//! rewritten on every assignment (truncate-then-write).
//!
//! File format: `u32 count`, then `count` repetitions of
//! `{u32 id, u32 path_len, path bytes}`, all integers little-endian.

use crate::cache::{read_u32, read_u32_or_eof};
use crate::error::{IoResultExt, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A persisted path ⇄ id index with load-modify-save discipline.
///
/// Every operation reloads the file so concurrent pool workers always see
/// the latest assignments; the internal mutex makes each load-modify-save
/// triplet atomic within the process.
#[derive(Debug)]
pub struct PathIndex {
    file: PathBuf,
    lock: Mutex<()>,
}

impl PathIndex {
    /// Create an index backed by `file` (the file need not exist yet).
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing index file.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Return the id for `path`, assigning and persisting the next id if
    /// the path is unknown.
    pub fn get_or_assign(&self, path: &str) -> Result<u32> {
        let _guard = self.lock.lock().unwrap();
        let (mut forward, _) = self.read_entries()?;

        if let Some(&id) = forward.get(path) {
            return Ok(id);
        }

        let id = forward.len() as u32 + 1;
        forward.insert(path.to_string(), id);
        self.write_entries(&forward)?;
        Ok(id)
    }

    /// Look up the id for `path` without assigning one.
    pub fn id_of(&self, path: &str) -> Result<Option<u32>> {
        let _guard = self.lock.lock().unwrap();
        let (forward, _) = self.read_entries()?;
        Ok(forward.get(path).copied())
    }

    /// Look up the path for `id`.
    pub fn path_of(&self, id: u32) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap();
        let (_, inverse) = self.read_entries()?;
        Ok(inverse.get(&id).cloned())
    }

    /// Snapshot both directions of the index.
    pub fn load_all(&self) -> Result<(HashMap<String, u32>, HashMap<u32, String>)> {
        let _guard = self.lock.lock().unwrap();
        self.read_entries()
    }

    fn read_entries(&self) -> Result<(HashMap<String, u32>, HashMap<u32, String>)> {
        let mut forward = HashMap::new();
        let mut inverse = HashMap::new();

        let file = match File::open(&self.file) {
            Ok(f) => f,
            // Missing index means nothing has been assigned yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((forward, inverse));
            }
            Err(e) => return Err(crate::error::SyncError::io(&self.file, e)),
        };
        let mut reader = BufReader::new(file);

        let Some(count) = read_u32_or_eof(&mut reader).with_path(&self.file)? else {
            return Ok((forward, inverse));
        };

        for _ in 0..count {
            let id = read_u32(&mut reader).with_path(&self.file)?;
            let path_len = read_u32(&mut reader).with_path(&self.file)?;
            let mut path_bytes = vec![0u8; path_len as usize];
            reader.read_exact(&mut path_bytes).with_path(&self.file)?;
            let path = String::from_utf8_lossy(&path_bytes).into_owned();

            forward.insert(path.clone(), id);
            inverse.insert(id, path);
        }

        Ok((forward, inverse))
    }

    fn write_entries(&self, forward: &HashMap<String, u32>) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_path(parent)?;
            }
        }

        let file = File::create(&self.file).with_path(&self.file)?;
        let mut writer = BufWriter::new(file);

        writer
            .write_all(&(forward.len() as u32).to_le_bytes())
            .with_path(&self.file)?;
        for (path, id) in forward {
            writer.write_all(&id.to_le_bytes()).with_path(&self.file)?;
            writer
                .write_all(&(path.len() as u32).to_le_bytes())
                .with_path(&self.file)?;
            writer.write_all(path.as_bytes()).with_path(&self.file)?;
        }
        writer.flush().with_path(&self.file)?;
        Ok(())
    }
}
