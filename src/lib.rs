//! # MirrorSync - Incremental Backup/Mirror Engine
//!
//! MirrorSync mirrors a set of source directories into one destination,
//! copying only what changed since the last run and resuming cleanly after
//! a crash.
//!
//! ## Features
//!
//! - **Metadata fingerprinting**: 16-byte truncated BLAKE3 over
//!   `(path, size, mtime)` decides what changed — no content reads
//! - **Per-source binary caches**: compact on-disk maps with
//!   miss-count-based stale eviction
//! - **Disk-aware copy engines**: a single-threaded HDD queue that
//!   protects the spindle, and a four-mode SSD engine
//!   (Sequential / Parallel / Balanced / GodSpeed)
//! - **Crash-safe resumption**: `.Failure`/`.Success` sentinels plus a
//!   persisted per-source copied flag let an interrupted run resume
//!   exactly where it stopped
//! - **Cache self-healing**: optional hidden `.BackupCache` mirror under
//!   the destination, restored automatically on cache corruption
//!
//! ## Quick Start
//!
//! ```no_run
//! use mirrorsync::config::Config;
//! use mirrorsync::core::SyncOrchestrator;
//! use std::path::PathBuf;
//!
//! let config = Config {
//!     sources: vec![PathBuf::from("/home/user/documents")],
//!     destination: PathBuf::from("/mnt/backup"),
//!     ..Config::default()
//! };
//!
//! let orchestrator = SyncOrchestrator::new(config, false).unwrap();
//! let report = orchestrator.run().unwrap();
//! report.print_summary();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod logging;
pub mod recovery;
pub mod sync;

// Re-export commonly used types
pub use config::{Config, DiskType, SsdMode};
pub use core::{RunReport, SyncOrchestrator};
pub use error::{Result, SyncError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
