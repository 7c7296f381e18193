//! HDD copy engine
//!
//! One background consumer thread copies at most one file system-wide at a
//! time, so multiple sources never interleave seeks on a spinning disk.
//! Each submitted task is all-or-nothing: only when every file of the
//! source copied does the consumer finalize it (cache update → eviction →
//! save → mark copied). A partial failure leaves the source unmarked for
//! the next run's recovery pass.

use crate::cache::{FileRecord, MetaCache};
use crate::sync::{finalize_source, CompletionTracker, EngineContext};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct HddTask {
    source_id: u32,
    files: Vec<FileRecord>,
    fresh: Vec<FileRecord>,
    cache: Arc<MetaCache>,
}

/// Single-consumer copy queue for spinning disks
pub struct HddCopyQueue {
    ctx: EngineContext,
    tracker: Arc<CompletionTracker>,
    tx: Mutex<Option<Sender<HddTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HddCopyQueue {
    /// Create a stopped queue.
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            tracker: Arc::new(CompletionTracker::new()),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the consumer thread.
    pub fn start(&self) {
        let (tx, rx) = unbounded();
        *self.tx.lock().unwrap() = Some(tx);

        let ctx = self.ctx.clone();
        let tracker = Arc::clone(&self.tracker);
        *self.worker.lock().unwrap() = Some(std::thread::spawn(move || {
            copy_loop(rx, ctx, tracker);
        }));
    }

    /// Enqueue one source's copy work.
    pub fn submit(
        &self,
        source_id: u32,
        files: Vec<FileRecord>,
        fresh: Vec<FileRecord>,
        cache: Arc<MetaCache>,
    ) {
        tracing::info!(
            "queueing source {source_id} for HDD copy | files: {}",
            files.len()
        );
        let task = HddTask {
            source_id,
            files,
            fresh,
            cache,
        };
        let guard = self.tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            if tx.send(task).is_err() {
                tracing::error!("HDD copy queue is stopped; source {source_id} dropped");
                self.tracker.decrement();
            }
        } else {
            tracing::error!("HDD copy queue was never started; source {source_id} dropped");
            self.tracker.decrement();
        }
    }

    /// Arm the pending counter for an upcoming submission.
    pub fn increment_pending(&self) {
        self.tracker.increment();
    }

    /// Drop a pending slot without a submission.
    pub fn decrement_pending(&self) {
        self.tracker.decrement();
    }

    /// Latch that no further sources will be submitted.
    pub fn mark_all_sources_submitted(&self) {
        self.tracker.mark_all_submitted();
    }

    /// Block until every submitted source drained.
    pub fn wait_until_done(&self) {
        self.tracker.wait_until_done();
    }

    /// Close the queue and join the consumer. Queued tasks finish first.
    pub fn stop(&self) {
        self.tx.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HddCopyQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_loop(rx: Receiver<HddTask>, ctx: EngineContext, tracker: Arc<CompletionTracker>) {
    while let Ok(task) = rx.recv() {
        let root = match ctx.index.path_of(task.source_id) {
            Ok(Some(root)) => root,
            _ => {
                tracing::error!(
                    "source {} missing from index; skipping task",
                    task.source_id
                );
                tracker.decrement();
                continue;
            }
        };

        let total = task.files.len();
        let mut copied = 0usize;
        for file in &task.files {
            if ctx.copier.copy_one(Path::new(&file.path), Path::new(&root)) {
                copied += 1;
            } else {
                tracing::error!("copy failed for {}", file.path);
            }
        }

        if copied == total {
            tracing::info!("all files copied for source {}", task.source_id);
            finalize_source(task.source_id, &task.fresh, &task.cache, &ctx);
        } else {
            // Not marked copied; the next run re-copies this source.
            tracing::error!(
                "not all files copied for source {} ({copied}/{total})",
                task.source_id
            );
        }
        tracker.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{PathIndex, StateStore};
    use crate::config::Config;
    use crate::fs::FileCopier;
    use crate::hash::fingerprint;
    use tempfile::TempDir;

    fn context(dest: &Path, cache_dir: &Path) -> EngineContext {
        let config = Arc::new(Config {
            destination: dest.to_path_buf(),
            ..Config::default()
        });
        EngineContext {
            copier: Arc::new(FileCopier::new(Arc::clone(&config))),
            state: Arc::new(StateStore::new(cache_dir.join("State.bin"))),
            index: Arc::new(PathIndex::new(cache_dir.join("Index.bin"))),
            config,
        }
    }

    fn record_for(path: &Path, size: u64) -> FileRecord {
        let path = path.to_string_lossy().into_owned();
        let mut r = FileRecord::new(path.clone(), size, 1);
        r.hash = fingerprint(&path, size, 1);
        r
    }

    #[cfg(unix)]
    #[test]
    fn test_hdd_queue_copies_and_finalizes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();

        let file_a = src.path().join("a.txt");
        let file_b = src.path().join("b.txt");
        std::fs::write(&file_a, b"aaa").unwrap();
        std::fs::write(&file_b, b"bb").unwrap();

        let ctx = context(dst.path(), cache_dir.path());
        let id = ctx
            .index
            .get_or_assign(&src.path().to_string_lossy())
            .unwrap();

        let fresh = vec![record_for(&file_a, 3), record_for(&file_b, 2)];
        let cache = Arc::new(MetaCache::new(cache_dir.path()));

        let queue = HddCopyQueue::new(ctx.clone());
        queue.start();
        queue.increment_pending();
        queue.submit(id, fresh.clone(), fresh, Arc::clone(&cache));
        queue.mark_all_sources_submitted();
        queue.wait_until_done();
        queue.stop();

        // Files landed in the full-path layout.
        let dest_a = dst
            .path()
            .join(crate::fs::sanitize_path(&file_a.to_string_lossy()));
        assert_eq!(std::fs::read(dest_a).unwrap(), b"aaa");

        // Cache saved before state marked; both visible now.
        assert!(cache_dir.path().join(format!("{id}.bin")).exists());
        assert!(ctx.state.is_copied(id).unwrap());
        assert_eq!(cache.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_hdd_partial_failure_leaves_source_unmarked() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();

        let real = src.path().join("real.txt");
        std::fs::write(&real, b"x").unwrap();
        let ghost = src.path().join("ghost.txt");

        let ctx = context(dst.path(), cache_dir.path());
        let id = ctx
            .index
            .get_or_assign(&src.path().to_string_lossy())
            .unwrap();

        let fresh = vec![record_for(&real, 1), record_for(&ghost, 9)];
        let cache = Arc::new(MetaCache::new(cache_dir.path()));

        let queue = HddCopyQueue::new(ctx.clone());
        queue.start();
        queue.increment_pending();
        queue.submit(id, fresh.clone(), fresh, cache);
        queue.mark_all_sources_submitted();
        queue.wait_until_done();
        queue.stop();

        assert!(!ctx.state.is_copied(id).unwrap());
        assert!(!cache_dir.path().join(format!("{id}.bin")).exists());
    }

    #[test]
    fn test_wait_returns_immediately_with_no_sources() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), dir.path());

        let queue = HddCopyQueue::new(ctx);
        queue.start();
        queue.mark_all_sources_submitted();
        queue.wait_until_done();
        queue.stop();
    }
}
