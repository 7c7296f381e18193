//! The run orchestrator
//!
//! Wires the whole pipeline together: sentinel protocol, parallel scan,
//! state reset, engine selection, per-source cache update jobs, engine
//! drain, success sentinel, optional cache backup.
//!
//! The failure sentinel is armed *before* any copy work starts; that
//! asymmetry is what lets the next process observe an interrupted run and
//! offer recovery.

use crate::cache::{FileRecord, MetaCache, PathIndex, StateStore};
use crate::config::{Config, DiskType};
use crate::error::Result;
use crate::fs::{FileCopier, ScannedFile, Scanner};
use crate::recovery::{
    self, mark_failure, mark_success, was_last_failure, was_last_success, CacheLayout,
};
use crate::sync::{sync_source, Engine, EngineContext, HddCopyQueue, SsdCopyQueue};
use crate::{hash, logging};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What a finished run did
#[derive(Debug, Default)]
pub struct RunReport {
    /// Files actually copied
    pub files_copied: u64,
    /// Bytes actually copied
    pub bytes_copied: u64,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// True when this run performed failure recovery instead of a normal
    /// sync
    pub recovered: bool,
}

impl RunReport {
    /// Print the end-of-run summary to the console.
    pub fn print_summary(&self) {
        if self.recovered {
            println!("\nRecovery completed successfully.");
            return;
        }
        println!("\n=== Sync Summary ===");
        println!("Files copied: {}", self.files_copied);
        println!(
            "Bytes copied: {}",
            humansize::format_size(self.bytes_copied, humansize::BINARY)
        );
        println!("Duration:     {:.2?}", self.duration);
    }
}

/// Drives one complete sync (or recovery) run
pub struct SyncOrchestrator {
    config: Arc<Config>,
    layout: CacheLayout,
    assume_continue: bool,
}

impl SyncOrchestrator {
    /// Resolve the destination cache layout (running the integrity check)
    /// and build the orchestrator.
    pub fn new(config: Config, assume_continue: bool) -> Result<Self> {
        let layout = CacheLayout::resolve(&config)?;
        Ok(Self {
            config: Arc::new(config),
            layout,
            assume_continue,
        })
    }

    /// Execute the run-start protocol and then either a full sync or a
    /// recovery pass.
    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();

        if !was_last_failure(&self.layout) && !was_last_success(&self.layout) {
            // First run against this destination.
            mark_failure(&self.layout)?;
        } else if was_last_failure(&self.layout) {
            if !self.confirm_recovery() {
                return Err(crate::error::SyncError::Recovery(
                    "recovery not confirmed".to_string(),
                ));
            }
            println!("Detected previous sync incomplete. Triggering recovery mode.");
            tracing::info!("previous sync incomplete, triggering recovery mode");
            recovery::run_recovery(&self.config, &self.layout)?;
            return Ok(RunReport {
                recovered: true,
                duration: start.elapsed(),
                ..RunReport::default()
            });
        } else {
            println!("Last sync status: success.");
            tracing::info!("last sync completed successfully");
            mark_failure(&self.layout)?;
        }

        logging::cleanup_old_logs(&self.config.log_dir, self.config.max_log_files);
        self.log_run_header();

        println!("Scanning sources...");
        tracing::info!("scanning sources");
        let per_source = self.scan_sources()?;
        tracing::info!("scanning sources complete");

        let state = Arc::new(StateStore::new(&self.layout.state_file));
        state.reset_all()?;

        let ctx = EngineContext {
            copier: Arc::new(FileCopier::new(Arc::clone(&self.config))),
            state,
            index: Arc::new(PathIndex::new(&self.layout.index_file)),
            config: Arc::clone(&self.config),
        };

        let engine = match self.config.disk_type {
            DiskType::Hdd => {
                let queue = Arc::new(HddCopyQueue::new(ctx.clone()));
                queue.start();
                Engine::Hdd(queue)
            }
            DiskType::Ssd => {
                let queue = Arc::new(SsdCopyQueue::new(ctx.clone(), self.config.ssd_mode)?);
                queue.start();
                Engine::Ssd(queue)
            }
        };

        println!("Initiating copying...");
        tracing::info!("initiating copying");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_count)
            .build()
            .map_err(|e| crate::error::SyncError::ThreadPool(e.to_string()))?;

        pool.scope(|scope| {
            for (source, files) in per_source {
                engine.increment_pending();
                let engine = &engine;
                let ctx = &ctx;
                let dest_cache_dir = &self.layout.dest_cache_dir;
                scope.spawn(move |_| {
                    update_cache_for_source(source, files, dest_cache_dir.clone(), ctx, engine);
                });
            }
        });

        engine.mark_all_sources_submitted();
        engine.wait_until_done();
        engine.stop();

        tracing::info!("copying procedure completed");
        mark_success(&self.layout)?;

        if self.config.enable_backup_copy_after_run {
            if let Err(e) = self.layout.backup_cache() {
                tracing::error!("failed to back up cache to destination: {e}");
                eprintln!("Failed to back up cache to destination: {e}");
            } else {
                println!("Cache successfully backed up to destination.");
            }
        }

        Ok(RunReport {
            files_copied: ctx.copier.files_copied(),
            bytes_copied: ctx.copier.bytes_copied(),
            duration: start.elapsed(),
            recovered: false,
        })
    }

    /// Scan every source in parallel on a `ThreadCount`-sized pool.
    fn scan_sources(&self) -> Result<Vec<(PathBuf, Vec<ScannedFile>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_count)
            .build()
            .map_err(|e| crate::error::SyncError::ThreadPool(e.to_string()))?;

        let results = Mutex::new(Vec::new());
        pool.scope(|scope| {
            for source in &self.config.sources {
                let results = &results;
                scope.spawn(move |_| {
                    println!("Scanning: {}", source.display());
                    let scanner = Scanner::new(self.config.excludes.clone());
                    let files = scanner.scan(source);
                    for file in &files {
                        tracing::info!(
                            "scanned: {} | {} bytes | mtime: {}",
                            file.path.display(),
                            file.size,
                            file.mtime_ns
                        );
                    }
                    results.lock().unwrap().push((source.clone(), files));
                });
            }
        });

        Ok(results.into_inner().unwrap())
    }

    fn confirm_recovery(&self) -> bool {
        if self.assume_continue {
            return true;
        }

        println!("Previous sync run did not complete successfully.");
        println!("To resume, please provide the same source paths used in the previous run.");
        println!("Refer to the logs for detailed information on the sources and destination involved.");
        println!("Type 'Continue' to proceed or Ctrl+C to exit:");

        let mut input = String::new();
        loop {
            input.clear();
            match std::io::stdin().read_line(&mut input) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {
                    if input.trim().eq_ignore_ascii_case("continue") {
                        return true;
                    }
                    println!("Invalid input. Please type 'Continue' to proceed:");
                }
            }
        }
    }

    fn log_run_header(&self) {
        tracing::info!("sources:");
        for source in &self.config.sources {
            tracing::info!("  {}", source.display());
        }
        tracing::info!("destination: {}", self.config.destination.display());
        if !self.config.excludes.is_empty() {
            tracing::info!("excludes:");
            for exclude in &self.config.excludes {
                tracing::info!("  {}", exclude.display());
            }
        }
    }
}

/// One pool job: assign the source its id, load its cache, hash the fresh
/// scan, and hand everything to the decider.
fn update_cache_for_source(
    source: PathBuf,
    files: Vec<ScannedFile>,
    dest_cache_dir: PathBuf,
    ctx: &EngineContext,
    engine: &Engine,
) {
    let id = match ctx.index.get_or_assign(&source.to_string_lossy()) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("cannot assign id for {}: {e}", source.display());
            engine.decrement_pending();
            return;
        }
    };

    let cache = Arc::new(MetaCache::new(dest_cache_dir));
    if let Err(e) = cache.load(id) {
        // Proceed with whatever loaded; every file then reads as changed
        // and gets re-copied, which is safe.
        tracing::error!("failed to load cache for source {id}: {e}");
    }

    let mut fresh: Vec<FileRecord> = files
        .into_iter()
        .map(|f| FileRecord::new(f.path.to_string_lossy().into_owned(), f.size, f.mtime_ns))
        .collect();

    if let Err(e) = hash::hash_records(&mut fresh, ctx.config.thread_count) {
        tracing::error!("hashing failed for {}: {e}", source.display());
        engine.decrement_pending();
        return;
    }
    tracing::info!("completed hashing for source: {}", source.display());

    sync_source(fresh, cache, id, engine, ctx);
}
