//! SSD copy engine
//!
//! Four scheduling modes share one completion protocol. Each submitted
//! source gets a `SourceStatus` with two done flags; the small side and
//! the large side each signal their flag exactly once — at submit time
//! when that side's queue is empty, otherwise when its last file
//! completes. When both flags are set the source is finalized: cache
//! update, eviction, save, mark copied, pending counter drop.
//!
//! | mode       | small files                         | large files        |
//! |------------|-------------------------------------|--------------------|
//! | Sequential | (decider routes everything large)   | one worker thread  |
//! | Parallel   | fixed-size pool                     | (none)             |
//! | Balanced   | fixed-size pool                     | one worker thread  |
//! | GodSpeed   | outer source pool + per-source pools| (merged into small)|
//!
//! Soft copy failures still count toward completion (so the run can
//! drain) but poison the source's `failed` flag, which suppresses the
//! finalize step; the source is retried on the next run.

use crate::cache::{FileRecord, MetaCache};
use crate::config::SsdMode;
use crate::error::{Result, SyncError};
use crate::sync::{finalize_source, CompletionTracker, EngineContext};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct SourcePayload {
    fresh: Vec<FileRecord>,
    cache: Arc<MetaCache>,
}

/// Completion bookkeeping for one submitted source.
///
/// Lives behind an `Arc` so pool workers hold a stable handle; the atomics
/// are never invalidated by status-map growth.
struct SourceStatus {
    small_done: AtomicBool,
    large_done: AtomicBool,
    failed: AtomicBool,
    payload: Mutex<Option<SourcePayload>>,
}

impl SourceStatus {
    fn new(fresh: Vec<FileRecord>, cache: Arc<MetaCache>) -> Self {
        Self {
            small_done: AtomicBool::new(false),
            large_done: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            payload: Mutex::new(Some(SourcePayload { fresh, cache })),
        }
    }
}

struct LargeBatch {
    source_id: u32,
    root: Arc<PathBuf>,
    files: Vec<FileRecord>,
}

struct SsdShared {
    ctx: EngineContext,
    tracker: CompletionTracker,
    statuses: Mutex<HashMap<u32, Arc<SourceStatus>>>,
    // GodSpeed per-source pools are created lazily under contention.
    inner_pools: Mutex<HashMap<u32, Arc<rayon::ThreadPool>>>,
    inner_pool_size: usize,
}

impl SsdShared {
    /// Signal one side done for `source_id`; finalize when both sides are.
    fn mark_queue_done(&self, source_id: u32, is_small: bool) {
        let status = {
            let statuses = self.statuses.lock().unwrap();
            match statuses.get(&source_id) {
                Some(s) => Arc::clone(s),
                None => {
                    tracing::error!("queue-done signal for unknown source {source_id}");
                    return;
                }
            }
        };

        if is_small {
            status.small_done.store(true, Ordering::SeqCst);
        } else {
            status.large_done.store(true, Ordering::SeqCst);
        }

        if !(status.small_done.load(Ordering::SeqCst) && status.large_done.load(Ordering::SeqCst))
        {
            return;
        }

        // Both sides done. Whoever removes the entry finalizes; a racing
        // signaller finds the map empty and backs off.
        let Some(status) = self.statuses.lock().unwrap().remove(&source_id) else {
            return;
        };

        if status.failed.load(Ordering::SeqCst) {
            tracing::error!(
                "source {source_id} had copy failures; leaving it unmarked for the next run"
            );
        } else if let Some(payload) = status.payload.lock().unwrap().take() {
            finalize_source(source_id, &payload.fresh, &payload.cache, &self.ctx);
        }

        self.tracker.decrement();
    }

    fn copy_file(&self, file: &FileRecord, root: &Path, status: &SourceStatus) {
        if !self.ctx.copier.copy_one(Path::new(&file.path), root) {
            tracing::error!("copy failed: {}", file.path);
            status.failed.store(true, Ordering::SeqCst);
        }
    }
}

/// Four-mode copy queue for solid-state destinations
pub struct SsdCopyQueue {
    mode: SsdMode,
    shared: Arc<SsdShared>,
    small_pool: Arc<rayon::ThreadPool>,
    godspeed_pool: Option<rayon::ThreadPool>,
    large_tx: Mutex<Option<Sender<LargeBatch>>>,
    large_worker: Mutex<Option<JoinHandle<()>>>,
}

impl SsdCopyQueue {
    /// Build the pools for `mode`; call [`start`](Self::start) before
    /// submitting.
    pub fn new(ctx: EngineContext, mode: SsdMode) -> Result<Self> {
        let small_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.config.parallel_files_per_source)
            .build()
            .map_err(|e| SyncError::ThreadPool(e.to_string()))?;

        let godspeed_pool = if mode == SsdMode::GodSpeed {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(ctx.config.godspeed_parallel_sources)
                    .build()
                    .map_err(|e| SyncError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };

        let inner_pool_size = ctx.config.godspeed_parallel_files_per_source;
        Ok(Self {
            mode,
            shared: Arc::new(SsdShared {
                ctx,
                tracker: CompletionTracker::new(),
                statuses: Mutex::new(HashMap::new()),
                inner_pools: Mutex::new(HashMap::new()),
                inner_pool_size,
            }),
            small_pool: Arc::new(small_pool),
            godspeed_pool,
            large_tx: Mutex::new(None),
            large_worker: Mutex::new(None),
        })
    }

    /// Spawn the large-file serializer where the mode uses one.
    pub fn start(&self) {
        if matches!(self.mode, SsdMode::Sequential | SsdMode::Balanced) {
            let (tx, rx) = unbounded();
            *self.large_tx.lock().unwrap() = Some(tx);

            let shared = Arc::clone(&self.shared);
            *self.large_worker.lock().unwrap() = Some(std::thread::spawn(move || {
                large_file_loop(rx, shared);
            }));
        }
    }

    /// Submit one source's queues together with the fresh records the
    /// engine replays into the cache on completion.
    pub fn submit(
        &self,
        source_id: u32,
        small: Vec<FileRecord>,
        large: Vec<FileRecord>,
        fresh: Vec<FileRecord>,
        cache: Arc<MetaCache>,
    ) {
        tracing::info!(
            "submitting source {source_id} | small: {} large: {}",
            small.len(),
            large.len()
        );

        let status = Arc::new(SourceStatus::new(fresh, cache));
        self.shared
            .statuses
            .lock()
            .unwrap()
            .insert(source_id, Arc::clone(&status));

        let root = match self.shared.ctx.index.path_of(source_id) {
            Ok(Some(root)) => Arc::new(PathBuf::from(root)),
            _ => {
                tracing::error!("source {source_id} missing from index; dropping submission");
                status.failed.store(true, Ordering::SeqCst);
                self.shared.mark_queue_done(source_id, true);
                self.shared.mark_queue_done(source_id, false);
                return;
            }
        };

        // Small side: signalled at submit when empty, by the last file
        // otherwise.
        if small.is_empty() {
            self.shared.mark_queue_done(source_id, true);
        } else {
            match self.mode {
                SsdMode::Sequential => {
                    // The decider routes everything large in this mode.
                    tracing::warn!(
                        "sequential mode received {} small files; ignoring",
                        small.len()
                    );
                    self.shared.mark_queue_done(source_id, true);
                }
                SsdMode::Parallel | SsdMode::Balanced => {
                    spawn_small_copies(
                        &self.shared,
                        &self.small_pool,
                        source_id,
                        Arc::clone(&root),
                        small,
                        Arc::clone(&status),
                    );
                }
                SsdMode::GodSpeed => {
                    let shared = Arc::clone(&self.shared);
                    let status = Arc::clone(&status);
                    let root = Arc::clone(&root);
                    self.godspeed_pool
                        .as_ref()
                        .expect("GodSpeed mode always builds the source pool")
                        .spawn(move || {
                            let inner = {
                                let mut pools = shared.inner_pools.lock().unwrap();
                                match pools.get(&source_id) {
                                    Some(pool) => Arc::clone(pool),
                                    None => {
                                        let pool = rayon::ThreadPoolBuilder::new()
                                            .num_threads(shared.inner_pool_size)
                                            .build()
                                            .map(Arc::new);
                                        match pool {
                                            Ok(pool) => {
                                                pools.insert(source_id, Arc::clone(&pool));
                                                pool
                                            }
                                            Err(e) => {
                                                tracing::error!(
                                                    "cannot build per-source pool: {e}"
                                                );
                                                status.failed.store(true, Ordering::SeqCst);
                                                drop(pools);
                                                shared.mark_queue_done(source_id, true);
                                                return;
                                            }
                                        }
                                    }
                                }
                            };
                            spawn_small_copies(&shared, &inner, source_id, root, small, status);
                        });
                }
            }
        }

        // Large side, same single-signal rule.
        if large.is_empty() {
            self.shared.mark_queue_done(source_id, false);
        } else {
            match self.mode {
                SsdMode::Sequential | SsdMode::Balanced => {
                    let batch = LargeBatch {
                        source_id,
                        root,
                        files: large,
                    };
                    let sent = {
                        let guard = self.large_tx.lock().unwrap();
                        match guard.as_ref() {
                            Some(tx) => tx.send(batch).is_ok(),
                            None => false,
                        }
                    };
                    if !sent {
                        tracing::error!(
                            "large-file worker unavailable; source {source_id} dropped"
                        );
                        status.failed.store(true, Ordering::SeqCst);
                        self.shared.mark_queue_done(source_id, false);
                    }
                }
                SsdMode::Parallel | SsdMode::GodSpeed => {
                    tracing::warn!(
                        "{:?} mode received {} large files; ignoring",
                        self.mode,
                        large.len()
                    );
                    self.shared.mark_queue_done(source_id, false);
                }
            }
        }
    }

    /// Arm the pending counter for an upcoming submission.
    pub fn increment_pending(&self) {
        self.shared.tracker.increment();
    }

    /// Drop a pending slot without a submission.
    pub fn decrement_pending(&self) {
        self.shared.tracker.decrement();
    }

    /// Latch that no further sources will be submitted.
    pub fn mark_all_sources_submitted(&self) {
        self.shared.tracker.mark_all_submitted();
    }

    /// Block until every submitted source drained.
    pub fn wait_until_done(&self) {
        self.shared.tracker.wait_until_done();
    }

    /// Close the large-file channel and join its worker. Already-spawned
    /// pool jobs finish on their own.
    pub fn stop(&self) {
        self.large_tx.lock().unwrap().take();
        if let Some(handle) = self.large_worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SsdCopyQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fan the files out on `pool`; the last completion signals small-done.
fn spawn_small_copies(
    shared: &Arc<SsdShared>,
    pool: &Arc<rayon::ThreadPool>,
    source_id: u32,
    root: Arc<PathBuf>,
    files: Vec<FileRecord>,
    status: Arc<SourceStatus>,
) {
    let total = files.len();
    let processed = Arc::new(AtomicUsize::new(0));

    tracing::info!("processing {total} small files for source {source_id} in parallel");

    for file in files {
        let shared = Arc::clone(shared);
        let root = Arc::clone(&root);
        let status = Arc::clone(&status);
        let processed = Arc::clone(&processed);

        pool.spawn(move || {
            shared.copy_file(&file, &root, &status);
            if processed.fetch_add(1, Ordering::SeqCst) + 1 == total {
                shared.mark_queue_done(source_id, true);
            }
        });
    }
}

fn large_file_loop(rx: Receiver<LargeBatch>, shared: Arc<SsdShared>) {
    while let Ok(batch) = rx.recv() {
        tracing::info!(
            "processing {} large files sequentially for source {}",
            batch.files.len(),
            batch.source_id
        );

        let status = {
            let statuses = shared.statuses.lock().unwrap();
            statuses.get(&batch.source_id).cloned()
        };
        let Some(status) = status else {
            tracing::error!("large batch for unknown source {}", batch.source_id);
            continue;
        };

        for file in &batch.files {
            shared.copy_file(file, &batch.root, &status);
        }
        shared.mark_queue_done(batch.source_id, false);
    }
}
