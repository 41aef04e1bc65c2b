//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Streaming a file into a staging path next to its destination
//! - Promoting a staged file to its final name
//! - Creating directories recursively
//! - Cleaning up partial files

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::checksums::StreamingSha256;
use crate::error::LeafError;

/// Suffix of staging files. A file carrying it is never a finished transfer.
pub const PARTIAL_SUFFIX: &str = ".offload-partial";

/// Staging path for `dst`: a hidden sibling in the same directory, so that
/// promotion is a same-volume rename.
pub fn partial_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    dst.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
}

/// Copy `src` into `dst`, calling `on_chunk` with the size of every chunk written.
///
/// The source modification time is carried over. When `hasher` is given it is
/// fed the bytes as they are read from the source.
///
/// # Returns
/// Number of bytes copied
pub fn copy_streamed(
    src: &Path,
    dst: &Path,
    buffer_size: usize,
    mut hasher: Option<&mut StreamingSha256>,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64, LeafError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| LeafError::io("open source", src, e))?;
    let src_mtime = src_file.metadata().ok().and_then(|m| m.modified().ok());

    let mut dst_file = fs::File::create(dst).map_err(|e| LeafError::io("create", dst, e))?;

    let mut buffer = vec![0u8; buffer_size.max(4096)];
    let mut copied: u64 = 0;
    loop {
        let n = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LeafError::io("read", src, e)),
        };
        dst_file
            .write_all(&buffer[..n])
            .map_err(|e| LeafError::io("write", dst, e))?;
        if let Some(h) = hasher.as_deref_mut() {
            h.update(&buffer[..n]);
        }
        copied += n as u64;
        on_chunk(n as u64);
    }

    dst_file
        .sync_all()
        .map_err(|e| LeafError::io("sync", dst, e))?;
    drop(dst_file);

    // Preserve modification time if available
    if let Some(mtime) = src_mtime {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            log::debug!("could not preserve mtime on {}: {}", dst.display(), e);
        }
    }

    Ok(copied)
}

/// Move a finished staging file onto its final name.
pub fn promote(staged: &Path, dst: &Path) -> Result<(), LeafError> {
    fs::rename(staged, dst).map_err(|e| LeafError::io("rename", dst, e))
}

/// Remove a partial or rejected destination file, ignoring a file that is already gone.
pub fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove partial file {}: {}", path.display(), e),
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), LeafError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(LeafError::io(
            "create directory",
            parent,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "parent path exists but is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| LeafError::io("create directory", parent, e))
        }
        Err(e) => Err(LeafError::io("create directory", parent, e)),
    }
}
