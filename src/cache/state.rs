//! Per-run copy state
//!
//! `State.bin` records which sources finished copying in the current run:
//! `u32 count`, then `count` repetitions of `{u32 id, u8 copied}`. The
//! recovery pass reads it to decide which sources still need work.
//!
//! Every mutation is a load → set → save under one mutex, so concurrent
//! engine callbacks cannot lose each other's flags. `mark_copied` must only
//! be called after the source's cache file has been saved; the reverse
//! order would let a crash lose cache updates for a source already marked
//! done.

use crate::cache::{read_u32, read_u8};
use crate::error::{IoResultExt, Result, SyncError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Handle on the persisted `State.bin` copied-flag map.
#[derive(Debug)]
pub struct StateStore {
    file: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    /// Create a store backed by `file` (need not exist yet).
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing state file.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Load the full map. A missing file is an empty map (first run).
    pub fn load(&self) -> Result<HashMap<u32, bool>> {
        let _guard = self.lock.lock().unwrap();
        self.read_map()
    }

    /// Record that `source_id` finished copying.
    pub fn mark_copied(&self, source_id: u32) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_map()?;
        map.insert(source_id, true);
        self.write_map(&map)?;
        tracing::info!("copy flag set for source {source_id}");
        Ok(())
    }

    /// Whether `source_id` finished copying in the current run.
    pub fn is_copied(&self, source_id: u32) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_map()?.get(&source_id).copied().unwrap_or(false))
    }

    /// Reset every flag to false at the start of a run.
    pub fn reset_all(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_map()?;
        for copied in map.values_mut() {
            *copied = false;
        }
        self.write_map(&map)?;
        tracing::info!("copy flags reset");
        Ok(())
    }

    fn read_map(&self) -> Result<HashMap<u32, bool>> {
        let mut map = HashMap::new();

        let file = match File::open(&self.file) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
            Err(e) => return Err(SyncError::io(&self.file, e)),
        };
        let mut reader = BufReader::new(file);

        let count = match read_u32(&mut reader) {
            Ok(c) => c,
            // A zero-length file reads as empty, same as a missing one.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(map),
            Err(e) => return Err(SyncError::io(&self.file, e)),
        };

        for _ in 0..count {
            let id = read_u32(&mut reader).with_path(&self.file)?;
            let copied = read_u8(&mut reader).with_path(&self.file)? != 0;
            map.insert(id, copied);
        }

        Ok(map)
    }

    fn write_map(&self, map: &HashMap<u32, bool>) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_path(parent)?;
            }
        }

        let file = File::create(&self.file).with_path(&self.file)?;
        let mut writer = BufWriter::new(file);

        writer
            .write_all(&(map.len() as u32).to_le_bytes())
            .with_path(&self.file)?;
        for (id, copied) in map {
            writer.write_all(&id.to_le_bytes()).with_path(&self.file)?;
            writer
                .write_all(&[u8::from(*copied)])
                .with_path(&self.file)?;
        }
        writer.flush().with_path(&self.file)?;
        Ok(())
    }
}
