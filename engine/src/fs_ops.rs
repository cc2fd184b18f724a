//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Validating job sources
//! - Creating destination directories (with extended-length paths on Windows)
//! - Listing and counting files that match a sequence pattern
//! - Chunked file copies with metadata preservation
//! - Best-effort cleanup of artifacts left by failed attempts

use crate::error::{DirCreateFailure, SourceKind, TransferError};
use crate::pattern;
use std::fs;
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory paths at or beyond this length need the `\\?\` form on Windows.
pub const LEGACY_PATH_LIMIT: usize = 248;

/// Rewrite a Windows path string into its extended-length form.
///
/// Returns `None` when the path is already extended or is not absolute
/// (drive-letter or UNC).
pub fn to_extended_form(path: &str) -> Option<String> {
    if path.starts_with(r"\\?\") {
        return None;
    }
    let normalized = path.replace('/', "\\");
    if let Some(rest) = normalized.strip_prefix(r"\\") {
        return Some(format!(r"\\?\UNC\{}", rest));
    }
    let bytes = normalized.as_bytes();
    if bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\' {
        return Some(format!(r"\\?\{}", normalized));
    }
    None
}

/// The path to hand to filesystem calls. Long absolute paths on Windows are
/// converted to the extended-length form; elsewhere the path is unchanged.
pub fn extended_length_path(path: &Path) -> PathBuf {
    if cfg!(windows) && path.as_os_str().len() >= LEGACY_PATH_LIMIT {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(path),
                Err(_) => return path.to_path_buf(),
            }
        };
        if let Some(extended) = absolute.to_str().and_then(to_extended_form) {
            return PathBuf::from(extended);
        }
    }
    path.to_path_buf()
}

/// Check that `path` exists and is the expected kind of entry.
///
/// Returns the file size for files and 0 for directories.
pub fn validate_source(path: &Path, expected: SourceKind) -> Result<u64, TransferError> {
    let metadata = fs::metadata(extended_length_path(path)).map_err(|_| TransferError::SourceNotFound {
        path: path.to_path_buf(),
    })?;
    let actual = if metadata.is_dir() {
        SourceKind::Directory
    } else {
        SourceKind::File
    };
    if actual != expected {
        return Err(TransferError::SourceKindMismatch {
            path: path.to_path_buf(),
            expected,
        });
    }
    Ok(if metadata.is_dir() { 0 } else { metadata.len() })
}

/// Ensure a directory exists, creating it recursively if necessary.
///
/// # Errors
/// `DestinationDirCreateFailed` if the path exists as a file or creation fails.
pub fn ensure_dir(dir: &Path) -> Result<(), TransferError> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    let target = extended_length_path(dir);

    match fs::metadata(&target) {
        Ok(metadata) => {
            if metadata.is_dir() {
                Ok(())
            } else {
                let source = io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "Path exists but is not a directory",
                );
                Err(TransferError::DestinationDirCreateFailed {
                    path: dir.to_path_buf(),
                    reason: DirCreateFailure::OsError,
                    source,
                })
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(&target).map_err(|e| TransferError::DestinationDirCreateFailed {
                path: dir.to_path_buf(),
                reason: DirCreateFailure::classify(&e),
                source: e,
            })
        }
        Err(e) => Err(TransferError::DestinationDirCreateFailed {
            path: dir.to_path_buf(),
            reason: DirCreateFailure::classify(&e),
            source: e,
        }),
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), TransferError> {
    match path.parent() {
        Some(parent) => ensure_dir(parent),
        None => Ok(()),
    }
}

/// Whether `a` and `b` resolve to the same existing file or directory.
pub fn same_location(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Size of a file, or `None` if it does not exist (or is not a file).
pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(extended_length_path(path))
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Regular files directly inside `dir` whose names match `pattern`, sorted.
pub fn list_matching(dir: &Path, pattern: &str) -> io::Result<Vec<PathBuf>> {
    let mut matches = Vec::new();
    for entry in fs::read_dir(extended_length_path(dir))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if pattern::matches_pattern(pattern, &name.to_string_lossy()) {
            matches.push(dir.join(name));
        }
    }
    matches.sort();
    Ok(matches)
}

/// Number of matching files in `dir`; 0 if it cannot be read.
pub fn count_matching(dir: &Path, pattern: &str) -> u64 {
    list_matching(dir, pattern)
        .map(|files| files.len() as u64)
        .unwrap_or(0)
}

pub fn total_size(files: &[PathBuf]) -> u64 {
    files.iter().filter_map(|f| file_size(f)).sum()
}

/// Copy a file in chunks, preserving its modification time.
///
/// `on_chunk` receives the running byte count after every chunk; returning
/// `ControlFlow::Break` stops the copy and yields `Ok(None)`. Existing
/// destination files are truncated and overwritten.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_chunked<F>(
    src: &Path,
    dst: &Path,
    chunk_size: usize,
    mut on_chunk: F,
) -> io::Result<Option<u64>>
where
    F: FnMut(u64) -> ControlFlow<()>,
{
    let mut src_file = fs::File::open(extended_length_path(src))?;
    let src_mtime = src_file.metadata()?.modified().ok();
    let mut dst_file = fs::File::create(extended_length_path(dst))?;

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;
    loop {
        let read = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst_file.write_all(&buffer[..read])?;
        copied += read as u64;
        if on_chunk(copied).is_break() {
            return Ok(None);
        }
    }
    dst_file.flush()?;
    drop(dst_file);

    // Preserve modification time if available
    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(
            extended_length_path(dst),
            filetime::FileTime::from_system_time(mtime),
        );
    }

    Ok(Some(copied))
}

/// Remove files left behind by a failed attempt. Failures are logged, not returned.
pub fn remove_artifacts(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(extended_length_path(path)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial destination file"),
        }
    }
}
