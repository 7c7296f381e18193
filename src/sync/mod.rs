//! Copy dispatch: the sync decider and the two copy engines
//!
//! The decider compares each source's fresh scan against its cache and
//! hands the changed files to a copy engine. The HDD engine serializes
//! every copy through one consumer thread; the SSD engine multiplexes a
//! small-file pool, a large-file serializer and, in GodSpeed mode,
//! per-source nested pools.
//!
//! Both engines share the same completion accounting: a pending-sources
//! counter armed by the orchestrator before each submission and drained as
//! sources finish, plus an "all sources submitted" latch. `wait_until_done`
//! returns once both conditions hold.

mod decider;
mod hdd;
mod ssd;

pub use decider::sync_source;
pub use hdd::HddCopyQueue;
pub use ssd::SsdCopyQueue;

pub(crate) use decider::classify;

use crate::cache::{FileRecord, MetaCache, PathIndex, StateStore};
use crate::config::Config;
use crate::fs::FileCopier;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

/// Shared handles every engine needs
#[derive(Clone)]
pub struct EngineContext {
    /// Immutable run configuration
    pub config: Arc<Config>,
    /// The copy primitive
    pub copier: Arc<FileCopier>,
    /// Per-run copied flags (`State.bin`)
    pub state: Arc<StateStore>,
    /// Source path ⇄ id index (`Index.bin`)
    pub index: Arc<PathIndex>,
}

/// Pending-sources counter with an all-submitted latch
pub(crate) struct CompletionTracker {
    state: Mutex<Completion>,
    done_cv: Condvar,
}

struct Completion {
    pending: usize,
    all_submitted: bool,
}

impl CompletionTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(Completion {
                pending: 0,
                all_submitted: false,
            }),
            done_cv: Condvar::new(),
        }
    }

    pub(crate) fn increment(&self) {
        self.state.lock().unwrap().pending += 1;
    }

    pub(crate) fn decrement(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 && state.all_submitted {
            self.done_cv.notify_all();
        }
    }

    pub(crate) fn mark_all_submitted(&self) {
        let mut state = self.state.lock().unwrap();
        state.all_submitted = true;
        if state.pending == 0 {
            self.done_cv.notify_all();
        }
    }

    pub(crate) fn wait_until_done(&self) {
        let mut state = self.state.lock().unwrap();
        while !(state.pending == 0 && state.all_submitted) {
            state = self.done_cv.wait(state).unwrap();
        }
    }
}

/// Finish one source: replay the fresh records into its cache, run the
/// eviction pass (deleting destination copies when configured), save the
/// cache file, and only then set the copied flag.
///
/// The save-before-mark order is the recovery hinge: a crash between the
/// two re-copies the source next run (harmless, hashes match), while the
/// reverse order would lose cache updates for a source marked done.
///
/// Returns false when the cache or state write fails; the source is then
/// left unmarked and retried on the next run.
pub(crate) fn finalize_source(
    source_id: u32,
    fresh: &[FileRecord],
    cache: &MetaCache,
    ctx: &EngineContext,
) -> bool {
    for record in fresh {
        cache.update(record.clone());
    }

    let evicted = cache.remove_stale(ctx.config.stale_entries);
    if ctx.config.delete_stale_from_dest && !evicted.is_empty() {
        match ctx.index.path_of(source_id) {
            Ok(Some(root)) => {
                for path in &evicted {
                    ctx.copier
                        .delete_stale_from_destination(path, Path::new(&root));
                }
            }
            _ => tracing::error!(
                "cannot resolve source {source_id}; stale destination files not deleted"
            ),
        }
    }

    if let Err(e) = cache.save(source_id) {
        tracing::error!("failed to save cache for source {source_id}: {e}");
        return false;
    }
    if let Err(e) = ctx.state.mark_copied(source_id) {
        tracing::error!("failed to mark source {source_id} copied: {e}");
        return false;
    }
    true
}

/// The engine selected for this run
pub enum Engine {
    /// Single-consumer spindle-friendly queue
    Hdd(Arc<HddCopyQueue>),
    /// Four-mode parallel queue
    Ssd(Arc<SsdCopyQueue>),
}

impl Engine {
    /// Arm the pending counter before submitting a source.
    pub fn increment_pending(&self) {
        match self {
            Engine::Hdd(q) => q.increment_pending(),
            Engine::Ssd(q) => q.increment_pending(),
        }
    }

    /// Drop a source from the pending counter without submitting it.
    pub fn decrement_pending(&self) {
        match self {
            Engine::Hdd(q) => q.decrement_pending(),
            Engine::Ssd(q) => q.decrement_pending(),
        }
    }

    /// Latch "no more submissions will come".
    pub fn mark_all_sources_submitted(&self) {
        match self {
            Engine::Hdd(q) => q.mark_all_sources_submitted(),
            Engine::Ssd(q) => q.mark_all_sources_submitted(),
        }
    }

    /// Block until every submitted source has drained.
    pub fn wait_until_done(&self) {
        match self {
            Engine::Hdd(q) => q.wait_until_done(),
            Engine::Ssd(q) => q.wait_until_done(),
        }
    }

    /// Shut the engine's threads down. Pending pool jobs finish first.
    pub fn stop(&self) {
        match self {
            Engine::Hdd(q) => q.stop(),
            Engine::Ssd(q) => q.stop(),
        }
    }
}
