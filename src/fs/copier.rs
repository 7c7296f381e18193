//! The file copy primitive
//!
//! `FileCopier::copy_one(source_abs, source_root) -> bool` is the single
//! contract the copy engines build on. Destination paths follow the
//! configured layout, parent directories are created on demand, and the
//! actual byte transfer is delegated to a platform [`CopyBackend`]:
//!
//! - POSIX: `copy_file_range` (probed once at startup) with an external
//!   `cp --preserve` fallback when the syscall is unsupported
//! - Windows: `CopyFileExW` preserving symlinks for ordinary files, a
//!   robocopy invocation for files at or above 2 GiB
//!
//! A failure to open or stat the *source* returns `false` (the file may
//! have vanished mid-run). A failure while writing is fatal: the process
//! logs a resume notice and exits, leaving the `.Failure` sentinel armed
//! so the next run resumes.

use crate::config::Config;
use crate::fs::path::{dest_path_for, extend_long_path};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Files at or above this size are "large": serialized in SSD-Balanced
/// mode and copied via robocopy on Windows.
pub const LARGE_FILE_THRESHOLD: u64 = 2 * 1024 * 1024 * 1024;

/// Platform-specific byte transfer
pub trait CopyBackend: Send + Sync {
    /// Copy `src` to `dest`, where `size` is the source's length in bytes.
    fn copy_file(&self, src: &Path, dest: &Path, size: u64) -> io::Result<()>;
}

/// POSIX backend: `copy_file_range` when the kernel supports it, external
/// `cp` preserving attributes otherwise.
#[cfg(unix)]
pub struct PosixCopyBackend {
    copy_file_range_supported: bool,
}

#[cfg(unix)]
impl PosixCopyBackend {
    /// Probe `copy_file_range` once; the result is cached for the process
    /// lifetime.
    pub fn detect() -> Self {
        use std::os::unix::io::AsRawFd;

        let supported = match (
            std::fs::File::open("/dev/null"),
            std::fs::OpenOptions::new().write(true).open("/dev/null"),
        ) {
            (Ok(src), Ok(dest)) => {
                let result = unsafe {
                    libc::copy_file_range(
                        src.as_raw_fd(),
                        std::ptr::null_mut(),
                        dest.as_raw_fd(),
                        std::ptr::null_mut(),
                        1,
                        0,
                    )
                };
                result >= 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ENOSYS)
            }
            _ => false,
        };

        if !supported {
            tracing::info!("copy_file_range not supported, using cp fallback");
        }
        Self {
            copy_file_range_supported: supported,
        }
    }
}

#[cfg(unix)]
impl CopyBackend for PosixCopyBackend {
    fn copy_file(&self, src: &Path, dest: &Path, size: u64) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        if !self.copy_file_range_supported {
            let status = std::process::Command::new("cp")
                .arg("--preserve=mode,ownership,timestamps")
                .arg(src)
                .arg(dest)
                .status()?;
            if !status.success() {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("cp exited with {status}"),
                ));
            }
            return Ok(());
        }

        let src_file = std::fs::File::open(src)?;
        let dest_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)?;

        let mut remaining = size;
        while remaining > 0 {
            let copied = unsafe {
                libc::copy_file_range(
                    src_file.as_raw_fd(),
                    std::ptr::null_mut(),
                    dest_file.as_raw_fd(),
                    std::ptr::null_mut(),
                    remaining as usize,
                    0,
                )
            };
            if copied < 0 {
                return Err(io::Error::last_os_error());
            }
            if copied == 0 {
                break;
            }
            remaining -= copied as u64;
        }
        Ok(())
    }
}

/// Windows backend: `CopyFileExW` for ordinary files, robocopy for files
/// at or above the large-file threshold.
#[cfg(windows)]
pub struct WindowsCopyBackend {
    thread_count: usize,
}

#[cfg(windows)]
impl WindowsCopyBackend {
    /// `thread_count` feeds robocopy's `/MT` switch.
    pub fn new(thread_count: usize) -> Self {
        Self { thread_count }
    }

    fn copy_small(&self, src: &Path, dest: &Path) -> io::Result<()> {
        use std::os::windows::ffi::OsStrExt;

        const COPY_FILE_COPY_SYMLINK: u32 = 0x0000_0800;

        let src_wide: Vec<u16> = src
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let dest_wide: Vec<u16> = dest
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: both buffers are valid null-terminated wide strings and
        // the callback/cancel parameters are unused.
        let result = unsafe {
            windows_sys::Win32::Storage::FileSystem::CopyFileExW(
                src_wide.as_ptr(),
                dest_wide.as_ptr(),
                None,
                std::ptr::null(),
                std::ptr::null_mut(),
                COPY_FILE_COPY_SYMLINK,
            )
        };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn copy_large(&self, src: &Path, dest: &Path) -> io::Result<()> {
        use crate::fs::path::strip_long_prefix;

        let src_dir = strip_long_prefix(src.parent().unwrap_or(src));
        let dest_dir = strip_long_prefix(dest.parent().unwrap_or(dest));
        let file_name = src.file_name().unwrap_or_default();

        let status = std::process::Command::new("robocopy")
            .arg(&src_dir)
            .arg(&dest_dir)
            .arg(file_name)
            .args(["/R:2", "/W:5", "/NFL", "/NDL", "/NJH"])
            .arg(format!("/MT:{}", self.thread_count))
            .status()?;

        // robocopy exit codes below 8 indicate success.
        match status.code() {
            Some(code) if code < 8 => Ok(()),
            Some(code) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("robocopy exited with {code}"),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "robocopy terminated by signal",
            )),
        }
    }
}

#[cfg(windows)]
impl CopyBackend for WindowsCopyBackend {
    fn copy_file(&self, src: &Path, dest: &Path, size: u64) -> io::Result<()> {
        if size >= LARGE_FILE_THRESHOLD {
            self.copy_large(src, dest)
        } else {
            self.copy_small(src, dest)
        }
    }
}

/// Running totals for the end-of-run summary
#[derive(Debug, Default)]
struct CopyCounters {
    files_copied: AtomicU64,
    bytes_copied: AtomicU64,
}

/// The copy primitive shared by every engine
pub struct FileCopier {
    config: Arc<Config>,
    backend: Box<dyn CopyBackend>,
    counters: CopyCounters,
}

impl FileCopier {
    /// Build the copier for the current platform. Backend detection runs
    /// once here.
    pub fn new(config: Arc<Config>) -> Self {
        #[cfg(unix)]
        let backend: Box<dyn CopyBackend> = Box::new(PosixCopyBackend::detect());
        #[cfg(windows)]
        let backend: Box<dyn CopyBackend> =
            Box::new(WindowsCopyBackend::new(config.thread_count));

        Self {
            config,
            backend,
            counters: CopyCounters::default(),
        }
    }

    /// Copy one source file into the destination layout.
    ///
    /// Returns `false` when the source cannot be read (it may have been
    /// deleted since the scan). Write-side failures terminate the process
    /// after printing a resume notice.
    pub fn copy_one(&self, source_abs: &Path, source_root: &Path) -> bool {
        let dest = dest_path_for(
            &self.config.destination,
            self.config.destination_top_folder,
            source_abs,
            source_root,
        );

        let metadata = match std::fs::metadata(source_abs) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("cannot open source {}: {e}", source_abs.display());
                return false;
            }
        };

        let dest = extend_long_path(&dest);
        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                self.handle_copy_failure(source_abs, &format!("create {}: {e}", parent.display()));
            }
        }

        tracing::info!(
            "copying {} -> {}",
            source_abs.display(),
            dest.display()
        );

        match self
            .backend
            .copy_file(&extend_long_path(source_abs), &dest, metadata.len())
        {
            Ok(()) => {
                self.counters.files_copied.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_copied
                    .fetch_add(metadata.len(), Ordering::Relaxed);
                true
            }
            Err(e) => self.handle_copy_failure(source_abs, &e.to_string()),
        }
    }

    /// Best-effort removal of an evicted entry's destination copy.
    pub fn delete_stale_from_destination(&self, source_path: &str, source_root: &Path) {
        let dest = dest_path_for(
            &self.config.destination,
            self.config.destination_top_folder,
            Path::new(source_path),
            source_root,
        );
        match std::fs::remove_file(&dest) {
            Ok(()) => tracing::info!("deleted stale destination file: {}", dest.display()),
            Err(e) => {
                tracing::error!("failed to delete stale file {}: {e}", dest.display());
            }
        }
    }

    /// Total files copied so far.
    pub fn files_copied(&self) -> u64 {
        self.counters.files_copied.load(Ordering::Relaxed)
    }

    /// Total bytes copied so far.
    pub fn bytes_copied(&self) -> u64 {
        self.counters.bytes_copied.load(Ordering::Relaxed)
    }

    /// Hard I/O failure: the sync state on disk is already consistent, so
    /// terminate with the `.Failure` sentinel armed and tell the user how
    /// to resume.
    fn handle_copy_failure(&self, path: &Path, reason: &str) -> ! {
        tracing::error!("copy failed: {} | {reason}", path.display());
        eprintln!("[NOTICE] The current sync state has been saved.");
        eprintln!(
            "You can resume copying the remaining files by running the program again after resolving the error."
        );
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn copier_for(dest: &Path, top_folder: bool) -> FileCopier {
        let config = Config {
            destination: dest.to_path_buf(),
            destination_top_folder: top_folder,
            ..Config::default()
        };
        FileCopier::new(Arc::new(config))
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_one_full_path_layout() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();

        let src = src_dir.path().join("data.txt");
        std::fs::write(&src, b"payload").unwrap();

        let copier = copier_for(dst_dir.path(), false);
        assert!(copier.copy_one(&src, src_dir.path()));

        let expected = dst_dir
            .path()
            .join(sanitize(&src));
        assert_eq!(std::fs::read(expected).unwrap(), b"payload");
        assert_eq!(copier.files_copied(), 1);
        assert_eq!(copier.bytes_copied(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_one_top_folder_layout() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();

        let root = src_dir.path().join("docs");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        let src = root.join("sub").join("a.txt");
        std::fs::write(&src, b"abc").unwrap();

        let copier = copier_for(dst_dir.path(), true);
        assert!(copier.copy_one(&src, &root));

        let expected = dst_dir.path().join("docs").join("sub").join("a.txt");
        assert_eq!(std::fs::read(expected).unwrap(), b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_one_missing_source_is_soft_failure() {
        let dst_dir = TempDir::new().unwrap();
        let copier = copier_for(dst_dir.path(), false);

        assert!(!copier.copy_one(Path::new("/no/such/file"), Path::new("/no/such")));
        assert_eq!(copier.files_copied(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_stale_from_destination() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();

        let src = src_dir.path().join("old.txt");
        std::fs::write(&src, b"old").unwrap();

        let copier = copier_for(dst_dir.path(), false);
        assert!(copier.copy_one(&src, src_dir.path()));

        let dest = dst_dir.path().join(sanitize(&src));
        assert!(dest.exists());

        copier.delete_stale_from_destination(&src.to_string_lossy(), src_dir.path());
        assert!(!dest.exists());
    }

    #[cfg(unix)]
    fn sanitize(path: &Path) -> String {
        crate::fs::path::sanitize_path(&path.to_string_lossy())
    }
}
