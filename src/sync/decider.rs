//! The sync decider
//!
//! For each source, compares the freshly scanned (and hashed) records
//! against the loaded cache, marks every seen path visited, and splits the
//! changed files into the queues the selected engine expects:
//!
//! | engine / mode       | small queue        | large queue            |
//! |---------------------|--------------------|------------------------|
//! | HDD                 | —                  | everything (one queue) |
//! | SSD Sequential      | —                  | everything             |
//! | SSD Parallel        | everything         | —                      |
//! | SSD GodSpeed        | everything         | —                      |
//! | SSD Balanced        | size < 2 GiB       | size ≥ 2 GiB           |
//!
//! When nothing changed, the engine is never involved: the cache is
//! refreshed, the eviction pass runs, the cache is saved, the source is
//! marked copied and the pending counter drops — so an all-clean run still
//! reaches success.

use crate::cache::{FileRecord, MetaCache};
use crate::config::{DiskType, SsdMode};
use crate::fs::LARGE_FILE_THRESHOLD;
use crate::sync::{finalize_source, Engine, EngineContext};
use std::sync::Arc;

/// Pick out the records that need copying, marking every fresh path
/// visited along the way.
pub(crate) fn classify(fresh: &[FileRecord], cache: &MetaCache) -> Vec<FileRecord> {
    let mut to_copy = Vec::new();

    for file in fresh {
        let changed = match cache.get(&file.path) {
            None => true,
            Some(cached) => cached.hash != file.hash,
        };
        if changed {
            tracing::info!("marked for copy: {}", file.path);
            to_copy.push(file.clone());
        } else {
            tracing::debug!("up to date: {}", file.path);
        }
        cache.mark_visited(&file.path);
    }

    to_copy
}

/// Split the to-copy set into `(small, large)` for the selected engine.
pub(crate) fn partition(
    to_copy: Vec<FileRecord>,
    disk_type: DiskType,
    ssd_mode: SsdMode,
) -> (Vec<FileRecord>, Vec<FileRecord>) {
    match (disk_type, ssd_mode) {
        (DiskType::Hdd, _) | (DiskType::Ssd, SsdMode::Sequential) => (Vec::new(), to_copy),
        (DiskType::Ssd, SsdMode::Parallel) | (DiskType::Ssd, SsdMode::GodSpeed) => {
            (to_copy, Vec::new())
        }
        (DiskType::Ssd, SsdMode::Balanced) => to_copy
            .into_iter()
            .partition(|f| f.size < LARGE_FILE_THRESHOLD),
    }
}

/// Decide and dispatch one source.
///
/// Consumes the fresh records so the engine can replay them into the cache
/// once its queues for this source drain.
pub fn sync_source(
    fresh: Vec<FileRecord>,
    cache: Arc<MetaCache>,
    source_id: u32,
    engine: &Engine,
    ctx: &EngineContext,
) {
    let to_copy = classify(&fresh, &cache);

    if to_copy.is_empty() {
        tracing::info!("no files to copy for source {source_id}");
        finalize_source(source_id, &fresh, &cache, ctx);
        engine.decrement_pending();
        return;
    }

    let (small, large) = partition(
        to_copy,
        ctx.config.disk_type,
        ctx.config.ssd_mode,
    );

    match engine {
        Engine::Hdd(queue) => {
            // The HDD engine has a single queue; partition() put
            // everything in `large`.
            queue.submit(source_id, large, fresh, cache);
        }
        Engine::Ssd(queue) => {
            queue.submit(source_id, small, large, fresh, cache);
        }
    }
}
