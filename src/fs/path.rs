//! Destination layout and path normalization
//!
//! Two destination layouts exist. The default mirrors the full source path:
//! `DestinationRoot / sanitize(source_abs_path)`, where sanitization strips
//! drive colons and rewrites UNC/long-path prefixes so an absolute path
//! becomes a relative one. Top-folder mode instead nests each source under
//! its final path component: `DestinationRoot / <top_folder> / <relative>`.
//!
//! The Windows-specific transforms are plain string functions compiled on
//! every platform (so they stay testable everywhere); only the dispatch is
//! platform-gated.

use std::path::{Path, PathBuf};

/// Windows MAX_PATH; longer paths need the `\\?\` prefix for Win32 calls.
#[cfg_attr(not(windows), allow(dead_code))]
const MAX_PATH_LIMIT: usize = 260;

/// Rewrite a Windows absolute path into a relative, destination-safe form:
/// `\\?\UNC\server\share` → `UNC/server/share`, `\\?\X:\p` → `X\p`,
/// `\\server\share` → `UNC/server/share`, `X:\p` → `X\p`.
pub(crate) fn sanitize_windows_form(abs: &str) -> String {
    if let Some(rest) = abs.strip_prefix(r"\\?\UNC\") {
        return format!("UNC/{rest}");
    }
    if let Some(rest) = abs.strip_prefix(r"\\?\") {
        let mut out = rest.to_string();
        if out.len() >= 2 && out.as_bytes()[1] == b':' {
            out.remove(1);
        }
        return out;
    }
    if let Some(rest) = abs.strip_prefix(r"\\") {
        return format!("UNC/{rest}");
    }
    let bytes = abs.as_bytes();
    if bytes.len() > 2 && bytes[1] == b':' && (bytes[2] == b'/' || bytes[2] == b'\\') {
        let mut out = abs.to_string();
        out.remove(1);
        return out;
    }
    abs.to_string()
}

/// Strip the leading `/` so a POSIX absolute path nests under the
/// destination root.
pub(crate) fn sanitize_posix_form(abs: &str) -> String {
    abs.strip_prefix('/').unwrap_or(abs).to_string()
}

/// Sanitize an absolute source path into the relative form used under the
/// destination root in full-path layout.
pub fn sanitize_path(abs: &str) -> String {
    #[cfg(windows)]
    {
        sanitize_windows_form(abs)
    }
    #[cfg(not(windows))]
    {
        sanitize_posix_form(abs)
    }
}

/// Prefix a path with `\\?\` when it exceeds MAX_PATH, so Win32 calls
/// accept it. Identity on other platforms and for short paths.
pub fn extend_long_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        let raw = path.to_string_lossy();
        if raw.starts_with(r"\\?\") || raw.len() < MAX_PATH_LIMIT {
            return path.to_path_buf();
        }
        if let Some(rest) = raw.strip_prefix(r"\\") {
            return PathBuf::from(format!(r"\\?\UNC\{rest}"));
        }
        PathBuf::from(format!(r"\\?\{raw}"))
    }
    #[cfg(not(windows))]
    {
        path.to_path_buf()
    }
}

/// Undo [`extend_long_path`] for display and relative-path computation.
pub fn strip_long_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{rest}"));
    }
    if let Some(rest) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(rest.to_string());
    }
    path.to_path_buf()
}

/// Compute the destination path for one source file.
///
/// `source_root` is the configured source root the file belongs to; it
/// decides the top-folder name and the relative portion in top-folder
/// layout.
pub fn dest_path_for(
    destination: &Path,
    top_folder_layout: bool,
    source_abs: &Path,
    source_root: &Path,
) -> PathBuf {
    if top_folder_layout {
        if source_root.is_file() {
            let name = source_abs.file_name().unwrap_or_default();
            return destination.join(name);
        }
        let root = strip_long_prefix(source_root);
        let file = strip_long_prefix(source_abs);
        let top = root.file_name().unwrap_or_default();
        let relative = file.strip_prefix(&root).unwrap_or(&file);
        destination.join(top).join(relative)
    } else {
        let sanitized = sanitize_path(&source_abs.to_string_lossy());
        destination.join(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_windows_forms() {
        assert_eq!(
            sanitize_windows_form(r"C:\Users\data"),
            r"C\Users\data"
        );
        assert_eq!(
            sanitize_windows_form(r"\\server\share\f.txt"),
            r"UNC/server\share\f.txt"
        );
        assert_eq!(
            sanitize_windows_form(r"\\?\UNC\server\share\f.txt"),
            r"UNC/server\share\f.txt"
        );
        assert_eq!(
            sanitize_windows_form(r"\\?\E:\deep\file.bin"),
            r"E\deep\file.bin"
        );
    }

    #[test]
    fn test_sanitize_posix_form() {
        assert_eq!(sanitize_posix_form("/home/user/data"), "home/user/data");
        assert_eq!(sanitize_posix_form("relative"), "relative");
    }

    #[test]
    fn test_strip_long_prefix() {
        assert_eq!(
            strip_long_prefix(Path::new(r"\\?\UNC\srv\share")),
            PathBuf::from(r"\\srv\share")
        );
        assert_eq!(
            strip_long_prefix(Path::new("/plain/path")),
            PathBuf::from("/plain/path")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_full_path_layout() {
        let dest = dest_path_for(
            Path::new("/backup"),
            false,
            Path::new("/home/user/docs/a.txt"),
            Path::new("/home/user/docs"),
        );
        assert_eq!(dest, PathBuf::from("/backup/home/user/docs/a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_top_folder_layout() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let root = dir.path().join("docs");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        let file = root.join("sub").join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let dest = dest_path_for(Path::new("/backup"), true, &file, &root);
        assert_eq!(dest, PathBuf::from("/backup/docs/sub/a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_top_folder_layout_single_file_source() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("single.txt");
        std::fs::write(&file, b"x").unwrap();

        let dest = dest_path_for(Path::new("/backup"), true, &file, &file);
        assert_eq!(dest, PathBuf::from("/backup/single.txt"));
    }
}
