//! Filesystem operations: scanning, destination layout, and the copy
//! primitive

mod copier;
mod path;
mod scanner;

pub use copier::{CopyBackend, FileCopier, LARGE_FILE_THRESHOLD};
pub use path::{dest_path_for, extend_long_path, sanitize_path, strip_long_prefix};
pub use scanner::{ScannedFile, Scanner};
