//! Failure detection and crash recovery
//!
//! Run liveness is encoded by two mutually exclusive sentinel files inside
//! the destination's cache directory: `.Failure` (armed before any work,
//! meaning "in progress or crashed") and `.Success` (written only after a
//! clean finish). Neither present means first run.
//!
//! [`CacheLayout::resolve`] assigns the destination its stable id, derives
//! every cache path, and verifies the directory's integrity — exactly one
//! sentinel plus both `Index.bin` and `State.bin` — restoring from the
//! hidden `.BackupCache` mirror under the destination when enabled.
//!
//! [`run_recovery`] re-syncs exactly the sources whose `State.bin` flag is
//! still false, deliberately without the copy engines: scan, hash, decide,
//! then copy serially.

use crate::cache::{FileRecord, MetaCache, PathIndex, StateStore};
use crate::config::Config;
use crate::error::{IoResultExt, Result, SyncError};
use crate::fs::{FileCopier, Scanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the hidden cache mirror under the destination root
pub const BACKUP_DIR_NAME: &str = ".BackupCache";

/// Resolved per-destination cache paths, frozen after config parse
#[derive(Debug, Clone)]
pub struct CacheLayout {
    /// Stable id of the destination
    pub destination_id: u32,
    /// `<CacheDir>/<DestinationID>/`
    pub dest_cache_dir: PathBuf,
    /// Source path ⇄ id index inside the cache dir
    pub index_file: PathBuf,
    /// Per-run copied flags inside the cache dir
    pub state_file: PathBuf,
    /// `.Failure` sentinel
    pub failure_file: PathBuf,
    /// `.Success` sentinel
    pub success_file: PathBuf,
    /// `.BackupCache` mirror under the destination root
    pub backup_dir: PathBuf,
}

impl CacheLayout {
    /// Assign the destination id, derive the cache paths, and check the
    /// cache directory's integrity (restoring from backup when allowed).
    ///
    /// Runs once, as soon as the destination is known.
    pub fn resolve(config: &Config) -> Result<Self> {
        let dest_index = PathIndex::new(config.cache_dir.join("DestinationIndex.bin"));
        let destination_id =
            dest_index.get_or_assign(&config.destination.to_string_lossy())?;
        tracing::info!("destination id: {destination_id}");

        let dest_cache_dir = config.cache_dir.join(destination_id.to_string());
        let layout = Self {
            destination_id,
            index_file: dest_cache_dir.join("Index.bin"),
            state_file: dest_cache_dir.join("State.bin"),
            failure_file: dest_cache_dir.join(".Failure"),
            success_file: dest_cache_dir.join(".Success"),
            backup_dir: config.destination.join(BACKUP_DIR_NAME),
            dest_cache_dir,
        };

        layout.check_integrity(config)?;
        Ok(layout)
    }

    fn check_integrity(&self, config: &Config) -> Result<()> {
        if !self.dest_cache_dir.exists() {
            std::fs::create_dir_all(&self.dest_cache_dir).with_path(&self.dest_cache_dir)?;
            tracing::info!("destination cache folder not found; assuming first run");
            return Ok(());
        }

        let has_failure = self.failure_file.exists();
        let has_success = self.success_file.exists();
        let has_index = self.index_file.exists();
        let has_state = self.state_file.exists();

        if (has_failure ^ has_success) && has_index && has_state {
            tracing::info!("destination cache structure verified");
            return Ok(());
        }

        tracing::error!(
            "destination cache exists but is missing critical files (state/index/sentinel)"
        );

        if config.enable_cache_restore_from_backup {
            if self.backup_dir.exists() {
                copy_dir_recursive(&self.backup_dir, &self.dest_cache_dir)?;
                tracing::info!(
                    "restored cache from backup: {}",
                    self.backup_dir.display()
                );
                println!("Cache successfully restored from backup.");
                Ok(())
            } else {
                Err(SyncError::CacheCorrupt(format!(
                    "no backup cache available at {}",
                    self.backup_dir.display()
                )))
            }
        } else {
            Err(SyncError::CacheCorrupt(
                "cache is incomplete and restore from backup is disabled".to_string(),
            ))
        }
    }

    /// Mirror the cache directory into `.BackupCache` under the
    /// destination, replacing any previous mirror.
    pub fn backup_cache(&self) -> Result<()> {
        if self.backup_dir.exists() {
            std::fs::remove_dir_all(&self.backup_dir).with_path(&self.backup_dir)?;
        }
        copy_dir_recursive(&self.dest_cache_dir, &self.backup_dir)?;
        hide_on_windows(&self.backup_dir);
        tracing::info!("cache backed up to {}", self.backup_dir.display());
        Ok(())
    }
}

/// Arm the failure sentinel (and clear success). Called before any copy
/// work so an interrupted process is observable by the next run.
pub fn mark_failure(layout: &CacheLayout) -> Result<()> {
    remove_ignoring_missing(&layout.success_file)?;
    std::fs::File::create(&layout.failure_file).with_path(&layout.failure_file)?;
    hide_on_windows(&layout.failure_file);
    Ok(())
}

/// Write the success sentinel (and clear failure). Called only after every
/// source's state entry is true.
pub fn mark_success(layout: &CacheLayout) -> Result<()> {
    remove_ignoring_missing(&layout.failure_file)?;
    std::fs::File::create(&layout.success_file).with_path(&layout.success_file)?;
    hide_on_windows(&layout.success_file);
    Ok(())
}

/// Did the previous run leave the failure sentinel?
pub fn was_last_failure(layout: &CacheLayout) -> bool {
    layout.failure_file.exists()
}

/// Did the previous run finish cleanly?
pub fn was_last_success(layout: &CacheLayout) -> bool {
    layout.success_file.exists()
}

fn remove_ignoring_missing(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

#[cfg(windows)]
fn hide_on_windows(path: &Path) {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{
        GetFileAttributesW, SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN,
        INVALID_FILE_ATTRIBUTES,
    };

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // SAFETY: wide is a valid null-terminated wide string.
    unsafe {
        let attrs = GetFileAttributesW(wide.as_ptr());
        if attrs == INVALID_FILE_ATTRIBUTES {
            return;
        }
        if SetFileAttributesW(wide.as_ptr(), attrs | FILE_ATTRIBUTE_HIDDEN) == 0 {
            tracing::warn!("could not mark {} hidden", path.display());
        }
    }
}

#[cfg(not(windows))]
fn hide_on_windows(_path: &Path) {}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).with_path(to)?;
    for entry in std::fs::read_dir(from).with_path(from)? {
        let entry = entry.with_path(from)?;
        let target = to.join(entry.file_name());
        if entry.file_type().with_path(entry.path())?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_path(entry.path())?;
        }
    }
    Ok(())
}

/// Resume an interrupted run: re-sync every configured source whose state
/// flag is still false, serially, then write the success sentinel.
///
/// Sources missing from the index are logged and skipped (they were not
/// part of the previous run). Any failure leaves `.Failure` in place so
/// the next run retries.
pub fn run_recovery(config: &Arc<Config>, layout: &CacheLayout) -> Result<()> {
    let index = PathIndex::new(&layout.index_file);
    let state = StateStore::new(&layout.state_file);
    let copier = FileCopier::new(Arc::clone(config));
    let scanner = Scanner::new(config.excludes.clone());

    let (path_to_id, _) = index.load_all()?;

    let mut pending: Vec<(PathBuf, u32)> = Vec::new();
    for source in &config.sources {
        let key = source.to_string_lossy();
        match path_to_id.get(key.as_ref()) {
            None => {
                tracing::info!("source not found in index, skipping: {key}");
                println!("Source not found in index: {key}");
            }
            Some(&id) => {
                if state.is_copied(id)? {
                    tracing::info!("source fully copied, skipping: {key}");
                    println!("Source fully copied, skipping: {key}");
                } else {
                    println!("Pending source: {key}");
                    pending.push((source.clone(), id));
                }
            }
        }
    }

    let mut overall_success = true;
    for (source, id) in pending {
        tracing::info!("recovering source: {}", source.display());
        println!("Working on: {}", source.display());

        let cache = MetaCache::new(&layout.dest_cache_dir);
        if let Err(e) = cache.load(id) {
            tracing::error!("failed to load cache for {}: {e}", source.display());
            overall_success = false;
            continue;
        }

        let scanned = scanner.scan(&source);
        let mut fresh: Vec<FileRecord> = scanned
            .into_iter()
            .map(|f| FileRecord::new(f.path.to_string_lossy().into_owned(), f.size, f.mtime_ns))
            .collect();
        crate::hash::hash_records(&mut fresh, config.thread_count)?;

        let to_copy = crate::sync::classify(&fresh, &cache);

        let mut source_ok = true;
        for file in &to_copy {
            if !copier.copy_one(Path::new(&file.path), &source) {
                tracing::error!("recovery copy failed: {}", file.path);
                source_ok = false;
            }
        }

        if !source_ok {
            overall_success = false;
            continue;
        }

        // Same durability order as the engines: cache on disk first, then
        // the copied flag.
        for record in &fresh {
            cache.update(record.clone());
        }
        if cache.save(id).is_err() || state.mark_copied(id).is_err() {
            overall_success = false;
            continue;
        }
        tracing::info!("source recovered: {}", source.display());
        println!("Source copied successfully: {}", source.display());
    }

    if overall_success {
        mark_success(layout)?;
        tracing::info!("all sources recovered");
        println!("All sources recovered successfully.");
        Ok(())
    } else {
        // .Failure stays on disk so the next run retries.
        Err(SyncError::Recovery(
            "recovery completed with errors; check the log".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::fingerprint;
    use tempfile::TempDir;

    fn config_for(dest: &Path, cache_dir: &Path) -> Config {
        Config {
            destination: dest.to_path_buf(),
            cache_dir: cache_dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_sentinels_are_mutually_exclusive() {
        let dest = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let config = config_for(dest.path(), cache.path());
        let layout = CacheLayout::resolve(&config).unwrap();

        mark_failure(&layout).unwrap();
        assert!(was_last_failure(&layout));
        assert!(!was_last_success(&layout));

        mark_success(&layout).unwrap();
        assert!(was_last_success(&layout));
        assert!(!was_last_failure(&layout));

        mark_failure(&layout).unwrap();
        assert!(was_last_failure(&layout));
        assert!(!was_last_success(&layout));
    }

    #[test]
    fn test_first_run_creates_cache_dir() {
        let dest = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let config = config_for(dest.path(), cache.path());

        let layout = CacheLayout::resolve(&config).unwrap();
        assert_eq!(layout.destination_id, 1);
        assert!(layout.dest_cache_dir.exists());
        assert!(!was_last_failure(&layout));
        assert!(!was_last_success(&layout));
    }

    #[test]
    fn test_destination_id_is_stable() {
        let dest = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let first = CacheLayout::resolve(&config_for(dest.path(), cache.path())).unwrap();
        // Give the first destination a healthy cache so re-resolving it
        // passes the integrity check.
        mark_failure(&first).unwrap();
        std::fs::write(&first.index_file, 0u32.to_le_bytes()).unwrap();
        std::fs::write(&first.state_file, 0u32.to_le_bytes()).unwrap();

        let second = CacheLayout::resolve(&config_for(other.path(), cache.path())).unwrap();
        let again = CacheLayout::resolve(&config_for(dest.path(), cache.path())).unwrap();

        assert_eq!(first.destination_id, 1);
        assert_eq!(second.destination_id, 2);
        assert_eq!(again.destination_id, 1);
    }

    #[test]
    fn test_incomplete_cache_without_backup_is_fatal() {
        let dest = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let mut config = config_for(dest.path(), cache.path());
        config.enable_cache_restore_from_backup = false;

        // First resolve creates the directory; wiping its contents while
        // keeping the directory simulates corruption.
        let layout = CacheLayout::resolve(&config).unwrap();
        std::fs::write(layout.dest_cache_dir.join("junk"), b"x").unwrap();

        assert!(matches!(
            CacheLayout::resolve(&config),
            Err(SyncError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_incomplete_cache_restored_from_backup() {
        let dest = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let config = config_for(dest.path(), cache.path());

        // Build a healthy cache, mirror it, then corrupt the original.
        let layout = CacheLayout::resolve(&config).unwrap();
        mark_success(&layout).unwrap();
        std::fs::write(&layout.index_file, 0u32.to_le_bytes()).unwrap();
        std::fs::write(&layout.state_file, 0u32.to_le_bytes()).unwrap();
        layout.backup_cache().unwrap();

        std::fs::remove_file(&layout.index_file).unwrap();
        std::fs::remove_file(&layout.state_file).unwrap();

        let restored = CacheLayout::resolve(&config).unwrap();
        assert!(restored.index_file.exists());
        assert!(restored.state_file.exists());
        assert!(was_last_success(&restored));
    }

    #[cfg(unix)]
    #[test]
    fn test_recovery_copies_pending_source_only() {
        let src_done = TempDir::new().unwrap();
        let src_pending = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        std::fs::write(src_done.path().join("done.txt"), b"done").unwrap();
        let pending_file = src_pending.path().join("todo.txt");
        std::fs::write(&pending_file, b"todo").unwrap();

        let mut config = config_for(dest.path(), cache.path());
        config.sources = vec![
            src_done.path().to_path_buf(),
            src_pending.path().to_path_buf(),
        ];
        let config = Arc::new(config);

        let layout = CacheLayout::resolve(&config).unwrap();
        mark_failure(&layout).unwrap();

        // Simulate the crashed run: both sources indexed, only the first
        // one finished.
        let index = PathIndex::new(&layout.index_file);
        let done_id = index
            .get_or_assign(&src_done.path().to_string_lossy())
            .unwrap();
        let pending_id = index
            .get_or_assign(&src_pending.path().to_string_lossy())
            .unwrap();
        let state = StateStore::new(&layout.state_file);
        state.mark_copied(done_id).unwrap();

        run_recovery(&config, &layout).unwrap();

        // The pending source was copied and marked; success replaced failure.
        let copied = dest.path().join(crate::fs::sanitize_path(
            &pending_file.to_string_lossy(),
        ));
        assert_eq!(std::fs::read(copied).unwrap(), b"todo");
        assert!(state.is_copied(pending_id).unwrap());
        assert!(was_last_success(&layout));
        assert!(!was_last_failure(&layout));

        // The finished source was left alone.
        let untouched = dest.path().join(crate::fs::sanitize_path(
            &src_done.path().join("done.txt").to_string_lossy(),
        ));
        assert!(!untouched.exists());

        // The recovered source's cache holds its fresh set.
        let cache = MetaCache::new(&layout.dest_cache_dir);
        cache.load(pending_id).unwrap();
        assert!(cache.has(&pending_file.to_string_lossy()));
    }

    #[cfg(unix)]
    #[test]
    fn test_rerun_after_recovery_copies_nothing() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let cache_root = TempDir::new().unwrap();

        let file = src.path().join("a.txt");
        std::fs::write(&file, b"abc").unwrap();

        let mut config = config_for(dest.path(), cache_root.path());
        config.sources = vec![src.path().to_path_buf()];
        let config = Arc::new(config);

        let layout = CacheLayout::resolve(&config).unwrap();
        mark_failure(&layout).unwrap();
        let index = PathIndex::new(&layout.index_file);
        let id = index.get_or_assign(&src.path().to_string_lossy()).unwrap();

        run_recovery(&config, &layout).unwrap();

        // Kill-between-save-and-mark simulation: clear the flag but keep
        // the saved cache. Recovery re-decides and finds nothing to copy.
        let state = StateStore::new(&layout.state_file);
        state.reset_all().unwrap();
        mark_failure(&layout).unwrap();

        // Cache hashes match the unchanged file, so classify is empty and
        // recovery just re-marks and succeeds.
        run_recovery(&config, &layout).unwrap();
        assert!(state.is_copied(id).unwrap());
        assert!(was_last_success(&layout));

        let cache = MetaCache::new(&layout.dest_cache_dir);
        cache.load(id).unwrap();
        let record = cache
            .get(&file.to_string_lossy())
            .expect("record for recovered file");
        assert_eq!(
            record.hash,
            fingerprint(&file.to_string_lossy(), 3, record.mtime)
        );
    }
}
