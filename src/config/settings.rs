//! Configuration settings for MirrorSync
//!
//! Defines the CLI surface, the immutable `Config` value, and the
//! line-oriented `key=value` parser for the sync configuration file.

use crate::error::{Result, SyncError};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default configuration file path
pub const DEFAULT_CONFIG_FILE: &str = "Config.txt";
/// Default log directory
pub const DEFAULT_LOG_DIR: &str = "Sync_Logs";
/// Default cache root directory
pub const DEFAULT_CACHE_DIR: &str = "Meta_Cache";

/// MirrorSync - incremental backup/mirror tool with crash-safe resumption
#[derive(Parser, Debug, Clone)]
#[command(name = "mirrorsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental file mirroring with disk-aware copy scheduling")]
pub struct CliArgs {
    /// Path to the sync configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_FILE, value_name = "PATH")]
    pub config: PathBuf,

    /// Directory holding the metadata cache
    #[arg(long, default_value = DEFAULT_CACHE_DIR, value_name = "PATH")]
    pub cache_dir: PathBuf,

    /// Directory holding run logs
    #[arg(long, default_value = DEFAULT_LOG_DIR, value_name = "PATH")]
    pub log_dir: PathBuf,

    /// Skip the interactive confirmation when resuming an interrupted run
    #[arg(long)]
    pub assume_continue: bool,

    /// Increase logging verbosity
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Disk type of the destination, selecting the copy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskType {
    /// Spinning disk: copies are serialized to protect the spindle
    Hdd,
    /// Solid state: parallel copy modes are available
    Ssd,
}

/// SSD engine scheduling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SsdMode {
    /// One file at a time on a single worker thread
    Sequential,
    /// All files through the small-file pool
    Parallel,
    /// Small files pooled, files at or above 2 GiB serialized
    Balanced,
    /// Nested pools: parallel sources, parallel files per source
    GodSpeed,
}

impl SsdMode {
    fn from_value(value: &str) -> Option<Self> {
        match value {
            "Sequential" => Some(Self::Sequential),
            "Parallel" => Some(Self::Parallel),
            "Balanced" => Some(Self::Balanced),
            "GodSpeed" => Some(Self::GodSpeed),
            _ => None,
        }
    }
}

/// Overall run profile, controlling the worker pool size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Background: two worker threads
    Background,
    /// Intermediate: four worker threads
    Intermediate,
    /// All hardware threads
    GodSpeed,
}

/// Immutable configuration for a sync run
///
/// Built once by [`ConfigParser::parse`] and threaded into every component.
/// The only late-bound state is the destination cache layout, resolved
/// separately once the destination is known (see `recovery::CacheLayout`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Source roots to mirror
    pub sources: Vec<PathBuf>,
    /// Destination root directory
    pub destination: PathBuf,
    /// Absolute paths excluded from scanning
    pub excludes: Vec<PathBuf>,
    /// Run profile
    pub mode: RunMode,
    /// Worker pool size for scanning, hashing and cache updates
    pub thread_count: usize,
    /// Destination disk type
    pub disk_type: DiskType,
    /// SSD engine mode
    pub ssd_mode: SsdMode,
    /// GodSpeed outer pool size (parallel sources)
    pub godspeed_parallel_sources: usize,
    /// GodSpeed inner pool size (parallel files per source)
    pub godspeed_parallel_files_per_source: usize,
    /// SSD small-file pool size
    pub parallel_files_per_source: usize,
    /// Miss-count threshold before a cache entry is evicted
    pub stale_entries: i32,
    /// Number of log files retained
    pub max_log_files: usize,
    /// Delete evicted entries from the destination as well
    pub delete_stale_from_dest: bool,
    /// Mirror the cache directory into the destination after a clean run
    pub enable_backup_copy_after_run: bool,
    /// Restore the cache from the destination mirror on integrity failure
    pub enable_cache_restore_from_backup: bool,
    /// Lay out the destination by source top-folder name instead of full path
    pub destination_top_folder: bool,
    /// Cache root directory
    pub cache_dir: PathBuf,
    /// Log directory
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            destination: PathBuf::new(),
            excludes: Vec::new(),
            mode: RunMode::Background,
            thread_count: 2,
            disk_type: DiskType::Hdd,
            ssd_mode: SsdMode::Balanced,
            godspeed_parallel_sources: 8,
            godspeed_parallel_files_per_source: 8,
            parallel_files_per_source: 8,
            stale_entries: 5,
            max_log_files: 10,
            delete_stale_from_dest: false,
            enable_backup_copy_after_run: true,
            enable_cache_restore_from_backup: true,
            destination_top_folder: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

/// Returns true when `parent` is a component-wise prefix of `child`
/// (equal paths count as a prefix).
pub(crate) fn is_parent_directory(parent: &Path, child: &Path) -> bool {
    child.starts_with(parent)
}

/// Parser for the line-oriented `key=value` configuration file
///
/// Fatal problems accumulate in `errors`; non-fatal notes (skipped
/// duplicates, mode implications) accumulate in `infos`. Parsing succeeds
/// only when no errors were recorded.
#[derive(Debug, Default)]
pub struct ConfigParser {
    errors: Vec<String>,
    infos: Vec<String>,
}

impl ConfigParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Fatal errors collected during the last parse
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Informational notes collected during the last parse
    pub fn infos(&self) -> &[String] {
        &self.infos
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn info(&mut self, message: impl Into<String>) {
        self.infos.push(message.into());
    }

    /// Parse the configuration file at `path`.
    ///
    /// `cache_dir` and `log_dir` come from the CLI and are copied into the
    /// resulting `Config` unchanged.
    pub fn parse(&mut self, path: &Path, cache_dir: &Path, log_dir: &Path) -> Result<Config> {
        self.errors.clear();
        self.infos.clear();

        if !path.exists() {
            self.error(format!("Config file does not exist: {}", path.display()));
            return Err(SyncError::config("config file missing"));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;

        let mut config = Config {
            cache_dir: cache_dir.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
            ..Config::default()
        };

        for (index, raw_line) in contents.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(equal_pos) = line.find('=') else {
                self.error(format!(
                    "Invalid format on line {line_number}: no '=' found."
                ));
                continue;
            };

            let key: String = line[..equal_pos]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let value = line[equal_pos + 1..].trim();

            self.apply_entry(&mut config, &key, value, line_number);
        }

        self.validate(&config);

        if self.errors.is_empty() {
            Ok(config)
        } else {
            Err(SyncError::config(format!(
                "{} error(s) in {}",
                self.errors.len(),
                path.display()
            )))
        }
    }

    fn apply_entry(&mut self, config: &mut Config, key: &str, value: &str, line: usize) {
        match key {
            "Source" => self.apply_source(config, value, line),
            "Destination" => self.apply_destination(config, value, line),
            "Exclude" => self.apply_exclude(config, value, line),
            "Mode" => match value {
                "BG" => {
                    config.mode = RunMode::Background;
                    config.thread_count = 2;
                    self.info("Mode set to 'BG' (Background). ThreadCount = 2");
                }
                "Inter" => {
                    config.mode = RunMode::Intermediate;
                    config.thread_count = 4;
                    self.info("Mode set to 'Inter' (Intermediate). ThreadCount = 4");
                }
                "GodSpeed" => {
                    config.mode = RunMode::GodSpeed;
                    let threads = num_cpus::get();
                    config.thread_count = if threads == 0 { 8 } else { threads };
                    self.info(format!(
                        "Mode set to 'GodSpeed'. ThreadCount = {}",
                        config.thread_count
                    ));
                }
                _ => self.error(format!(
                    "Line {line}: Invalid Mode. Use 'BG' or 'Inter' or 'GodSpeed'."
                )),
            },
            "ThreadCount" => {
                if let Some(n) = self.parse_count(value, key, line) {
                    config.thread_count = n;
                }
            }
            "GodSpeedParallelSourcesCount" => {
                if let Some(n) = self.parse_count(value, key, line) {
                    config.godspeed_parallel_sources = n;
                }
            }
            "GodSpeedParallelFilesPerSourcesCount" => {
                if let Some(n) = self.parse_count(value, key, line) {
                    config.godspeed_parallel_files_per_source = n;
                }
            }
            "ParallelFilesPerSourceCount" => {
                if let Some(n) = self.parse_count(value, key, line) {
                    config.parallel_files_per_source = n;
                }
            }
            "StaleEntries" => {
                if let Some(n) = self.parse_count(value, key, line) {
                    config.stale_entries = n as i32;
                }
            }
            "MaxLogFiles" => {
                if let Some(n) = self.parse_count(value, key, line) {
                    config.max_log_files = n;
                }
            }
            "DiskType" => match value {
                "SSD" => {
                    config.disk_type = DiskType::Ssd;
                    self.info("DiskType set to 'SSD' (disk thrashing prevention disabled).");
                }
                "HDD" => {
                    config.disk_type = DiskType::Hdd;
                    self.info("DiskType set to 'HDD' (disk thrashing prevention enabled).");
                }
                _ => self.error(format!("Line {line}: Invalid DiskType. Use 'SSD' or 'HDD'.")),
            },
            "SSDMode" => match SsdMode::from_value(value) {
                Some(mode) => {
                    config.ssd_mode = mode;
                    self.info(format!("SSDMode set to '{value}'."));
                }
                None => self.error(format!(
                    "Line {line}: Invalid SSDMode. Use 'Sequential', 'Parallel', 'Balanced' or 'GodSpeed'."
                )),
            },
            "DeleteStaleFromDest" => {
                if let Some(v) = self.parse_yes_no(value, key, line) {
                    config.delete_stale_from_dest = v;
                }
            }
            "EnableBackupCopyAfterRun" => {
                if let Some(v) = self.parse_yes_no(value, key, line) {
                    config.enable_backup_copy_after_run = v;
                }
            }
            "EnableCacheRestoreFromBackup" => {
                if let Some(v) = self.parse_yes_no(value, key, line) {
                    config.enable_cache_restore_from_backup = v;
                }
            }
            "DestinationTopFolderInsteadOfFullPath" => {
                if let Some(v) = self.parse_yes_no(value, key, line) {
                    config.destination_top_folder = v;
                    if v {
                        self.info(
                            "Destination will contain only the top-level source folder name.",
                        );
                    } else {
                        self.info("Destination will preserve the full source path structure.");
                    }
                }
            }
            _ => self.error(format!("Line {line}: Unknown key '{key}'.")),
        }
    }

    fn apply_source(&mut self, config: &mut Config, value: &str, line: usize) {
        let source = PathBuf::from(value);
        if !source.is_absolute() {
            self.error(format!("Line {line}: Source path is not absolute."));
            return;
        }
        let Ok(meta) = std::fs::metadata(&source) else {
            self.error(format!("Line {line}: Source path does not exist."));
            return;
        };
        if !meta.is_dir() && !meta.is_file() {
            self.error(format!(
                "Line {line}: Source path is neither a file nor a directory."
            ));
            return;
        }

        for existing in &config.sources {
            if is_parent_directory(existing, &source) {
                self.info(format!(
                    "Line {line}: Skipping source '{value}' because '{}' is already added.",
                    existing.display()
                ));
                return;
            }
            if is_parent_directory(&source, existing) {
                self.info(format!(
                    "Line {line}: Skipping parent directory '{value}' because '{}' is already added.",
                    existing.display()
                ));
                return;
            }
        }

        config.sources.push(source);
    }

    fn apply_destination(&mut self, config: &mut Config, value: &str, line: usize) {
        let dest = PathBuf::from(value);
        if !dest.is_absolute() {
            self.error(format!("Line {line}: Destination path is not absolute."));
            return;
        }
        if !config.destination.as_os_str().is_empty() {
            self.error(format!("Line {line}: Multiple destination entries found."));
            return;
        }
        if !dest.exists() {
            self.error(format!("Line {line}: Destination path does not exist."));
            return;
        }
        if !dest.is_dir() {
            self.error(format!("Line {line}: Destination path is not a directory."));
            return;
        }
        config.destination = dest;
    }

    fn apply_exclude(&mut self, config: &mut Config, value: &str, line: usize) {
        let exclude = PathBuf::from(value);
        if !exclude.is_absolute() {
            self.error(format!("Line {line}: Exclude path is not absolute."));
            return;
        }
        if config.excludes.contains(&exclude) {
            self.info(format!(
                "Line {line}: Duplicate exclude path '{value}'. Ignored."
            ));
            return;
        }
        config.excludes.push(exclude);
    }

    fn parse_count(&mut self, value: &str, key: &str, line: usize) -> Option<usize> {
        match value.parse::<u16>() {
            Ok(0) => {
                self.error(format!("Line {line}: {key} must be greater than zero."));
                None
            }
            Ok(n) => {
                self.info(format!("{key} set to {n}"));
                Some(n as usize)
            }
            Err(_) => {
                self.error(format!("Line {line}: Invalid number for {key}."));
                None
            }
        }
    }

    fn parse_yes_no(&mut self, value: &str, key: &str, line: usize) -> Option<bool> {
        match value {
            "YES" => Some(true),
            "NO" => Some(false),
            _ => {
                self.error(format!("Line {line}: Invalid input for {key}. Use 'YES' or 'NO'."));
                None
            }
        }
    }

    /// Cross-field validation run after every line has been consumed.
    fn validate(&mut self, config: &Config) {
        if config.sources.is_empty() {
            self.error("No source paths provided.");
        }
        if config.destination.as_os_str().is_empty() {
            self.error("No destination path provided.");
            return;
        }

        let dest = &config.destination;
        let mut used_names = HashSet::new();

        for source in &config.sources {
            if source == dest {
                self.error(format!(
                    "Source path '{}' is the same as the destination path.",
                    source.display()
                ));
                continue;
            }
            if is_parent_directory(source, dest) {
                self.error(format!(
                    "Destination '{}' is inside source directory '{}'. This is not allowed.",
                    dest.display(),
                    source.display()
                ));
                continue;
            }
            if config.destination_top_folder {
                let final_name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !used_names.insert(final_name.clone()) {
                    self.error(format!(
                        "Source '{}' results in duplicate name '{final_name}' at destination.",
                        source.display()
                    ));
                }
            }
        }
    }
}
