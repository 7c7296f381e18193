//! Configuration parsing and validation

mod settings;

pub use settings::{
    CliArgs, Config, ConfigParser, DiskType, RunMode, SsdMode, DEFAULT_CACHE_DIR,
    DEFAULT_CONFIG_FILE, DEFAULT_LOG_DIR,
};
