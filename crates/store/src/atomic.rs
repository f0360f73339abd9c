//! Atomic file replacement
//!
//! Content is written to a temporary file in the destination directory,
//! flushed to disk, then renamed over the destination. The parent directory
//! is synced afterwards so the rename itself survives a crash.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};

/// Size and SHA-256 of content written by [`write_atomic`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes written
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub sha256: String,
}

/// Writer that hashes and counts everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Create a temporary file next to `dest`, creating parent directories.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created or the temp file
/// cannot be opened.
pub fn temp_file_for(dest: &Path) -> Result<NamedTempFile> {
    let parent = parent_dir(dest);
    fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    tempfile::Builder::new()
        .prefix(".cistash-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| Error::io(e, parent, "create temp file"))
}

/// Stream `reader` into `dest` atomically.
///
/// Either the full content lands at `dest` or `dest` is left untouched. The
/// temporary file is removed on every failure path.
///
/// # Errors
///
/// Returns an I/O error if reading, writing, syncing or renaming fails.
pub fn write_atomic<R: Read>(dest: &Path, mut reader: R) -> Result<WriteOutcome> {
    let temp = temp_file_for(dest)?;
    let mut writer = HashingWriter {
        inner: temp.as_file(),
        hasher: Sha256::new(),
        written: 0,
    };
    io::copy(&mut reader, &mut writer).map_err(|e| Error::io(e, temp.path(), "copy"))?;
    writer
        .flush()
        .map_err(|e| Error::io(e, temp.path(), "flush"))?;
    let outcome = WriteOutcome {
        size: writer.written,
        sha256: hex::encode(writer.hasher.finalize()),
    };
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::io(e, temp.path(), "sync"))?;
    replace(temp.into_temp_path(), dest)?;
    Ok(outcome)
}

/// Write `bytes` to `dest` atomically.
///
/// # Errors
///
/// Returns an I/O error if writing or renaming fails.
pub fn write_bytes_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(dest, bytes).map(|_| ())
}

/// Rename a fully written temporary file over `dest` and sync the parent.
///
/// # Errors
///
/// Returns an I/O error if the rename fails. The temporary file is deleted
/// in that case.
pub fn replace(temp: TempPath, dest: &Path) -> Result<()> {
    // Windows refuses to rename over an existing file. Between this removal
    // and the rename below the destination is briefly absent.
    #[cfg(windows)]
    if dest.exists() {
        fs::remove_file(dest).map_err(|e| Error::io(e, dest, "remove"))?;
    }

    temp.persist(dest)
        .map_err(|e| Error::io(e.error, dest, "rename"))?;
    sync_parent(dest);
    Ok(())
}

/// Best-effort fsync of the directory containing `path`.
pub fn sync_parent(path: &Path) {
    #[cfg(unix)]
    {
        let parent = parent_dir(path);
        if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!(dir = %parent.display(), error = %e, "Failed to sync directory");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
