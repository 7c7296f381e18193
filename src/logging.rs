//! Logging infrastructure for MirrorSync
//!
//! Each run writes to its own timestamped file under the log directory
//! (`Sync_Log<stamp>.txt`). The subscriber honours `RUST_LOG`, falling back
//! to `info`, and `cleanup_old_logs` keeps only the newest `MaxLogFiles`
//! files.

use crate::error::{IoResultExt, Result};
use chrono::Local;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Prefix shared by every run's log file
const LOG_FILE_PREFIX: &str = "Sync_Log";

/// Initialize the global subscriber writing to a fresh log file.
///
/// Returns the path of the file so the orchestrator can echo it to the
/// user at the end of the run. Must be called once, before any tracing
/// macros fire.
pub fn init(log_dir: &Path, verbose: u8) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir).with_path(log_dir)?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = log_dir.join(format!("{LOG_FILE_PREFIX}{stamp}.txt"));
    let file = File::create(&log_path).with_path(&log_path)?;

    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();

    tracing::info!("sync started");
    Ok(log_path)
}

/// Remove the oldest log files, keeping the newest `max_log_files`.
///
/// The timestamped names sort lexicographically by age, so a name sort is
/// an age sort. Removal errors are ignored; retention is best-effort.
pub fn cleanup_old_logs(log_dir: &Path, max_log_files: usize) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(LOG_FILE_PREFIX))
                    .unwrap_or(false)
        })
        .collect();

    if logs.len() <= max_log_files {
        return;
    }

    logs.sort();
    let excess = logs.len() - max_log_files;
    for old in logs.into_iter().take(excess) {
        if std::fs::remove_file(&old).is_err() {
            tracing::warn!("could not remove old log file: {}", old.display());
        }
    }
}
