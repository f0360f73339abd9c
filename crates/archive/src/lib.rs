//! Cache archive codec
//!
//! An [`ArchiveCodec`] packs a set of cache paths into a single compressed
//! file and unpacks selected paths from it again. [`TarZstdCodec`] writes a
//! tar stream compressed with zstd.
//!
//! Codec operations are synchronous and perform blocking file I/O; async
//! callers should run them on a blocking thread and pass a
//! [`CancellationToken`] so a shutdown request stops them between entries
//! or mid-stream.

mod error;
pub mod paths;

pub use error::{Error, Result};
pub use paths::PathMapping;

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Default zstd compression level
pub const DEFAULT_LEVEL: i32 = 3;

/// Result of building an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Where the archive was written
    pub archive_path: PathBuf,
    /// Size of the compressed archive
    pub size: u64,
    /// Sum of the sizes of the regular files archived
    pub written_bytes: u64,
    /// Number of archive entries (files, directories and links)
    pub written_entries: u64,
    /// Lowercase hex SHA-256 of the archive file
    pub sha256_sum: String,
    /// Time taken to build
    pub duration: Duration,
}

/// Result of extracting an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractInfo {
    /// Sum of the sizes of the regular files extracted
    pub extracted_bytes: u64,
    /// Number of entries extracted
    pub extracted_entries: u64,
    /// Time taken to extract
    pub duration: Duration,
}

/// Builds and extracts cache archives
pub trait ArchiveCodec: Send + Sync + fmt::Debug {
    /// Compression name reported to the registry
    fn compression(&self) -> &'static str;

    /// File extension for archives produced by this codec
    fn extension(&self) -> &'static str;

    /// Archive `paths` (resolved against `working_dir`) into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is invalid or cannot be read, or the
    /// archive cannot be written. Returns [`Error::Cancelled`] once `cancel`
    /// fires.
    fn build(
        &self,
        working_dir: &Path,
        paths: &[String],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArchiveInfo>;

    /// Extract the entries for `paths` from `archive` into place.
    ///
    /// Entries outside the requested paths are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is unreadable, contains unsafe entries,
    /// or a file cannot be written. Returns [`Error::Cancelled`] once `cancel`
    /// fires.
    fn extract(
        &self,
        working_dir: &Path,
        archive: &Path,
        paths: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExtractInfo>;
}

/// tar + zstd codec
#[derive(Debug, Clone, Copy)]
pub struct TarZstdCodec {
    level: i32,
}

impl Default for TarZstdCodec {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
        }
    }
}

impl TarZstdCodec {
    /// Codec with an explicit zstd level
    #[must_use]
    pub const fn with_level(level: i32) -> Self {
        Self { level }
    }

    fn write_archive(
        &self,
        mappings: &[PathMapping],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64)> {
        let file = fs::File::create(dest).map_err(|e| Error::io(e, dest, "create"))?;
        let encoder = zstd::Encoder::new(Interruptible::new(file, cancel), self.level)
            .map_err(|e| Error::io(e, dest, "zstd init"))?;
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let mut written_bytes = 0u64;
        let mut written_entries = 0u64;
        for mapping in mappings {
            for entry in WalkDir::new(&mapping.disk)
                .follow_links(false)
                .sort_by_file_name()
            {
                check_cancelled(cancel)?;
                let entry = entry.map_err(|e| {
                    let path = e.path().map_or_else(|| mapping.disk.clone(), Path::to_path_buf);
                    Error::io(io::Error::other(e), path, "walk")
                })?;
                let rel = entry
                    .path()
                    .strip_prefix(&mapping.disk)
                    .map_err(|_| Error::invalid_path(&mapping.spec, "walk escaped its root"))?;
                let name = entry_name(&mapping.entry, rel, &mapping.spec)?;

                builder
                    .append_path_with_name(entry.path(), &name)
                    .map_err(|e| Error::io(e, entry.path(), "append"))?;
                written_entries += 1;
                if entry.file_type().is_file() {
                    written_bytes += entry
                        .metadata()
                        .map_err(|e| Error::io(io::Error::other(e), entry.path(), "stat"))?
                        .len();
                }
            }
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::io(e, dest, "tar finalize"))?;
        let file = encoder
            .finish()
            .map_err(|e| Error::io(e, dest, "zstd finish"))?
            .into_inner();
        file.sync_all().map_err(|e| Error::io(e, dest, "sync"))?;
        Ok((written_bytes, written_entries))
    }

    fn unpack_archive(
        mappings: &[PathMapping],
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64)> {
        let file = fs::File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
        let decoder = zstd::Decoder::new(Interruptible::new(file, cancel))
            .map_err(|e| Error::io(e, archive, "zstd init"))?;
        let mut tar = tar::Archive::new(decoder);
        tar.set_preserve_permissions(true);
        tar.set_preserve_mtime(true);
        tar.set_overwrite(true);

        let mut extracted_bytes = 0u64;
        let mut extracted_entries = 0u64;
        for entry in tar.entries().map_err(|e| Error::io(e, archive, "read"))? {
            check_cancelled(cancel)?;
            let mut entry = entry.map_err(|e| Error::io(e, archive, "read entry"))?;
            let name = {
                let path = entry.path().map_err(|e| Error::io(e, archive, "entry path"))?;
                safe_entry_name(&path)?
            };

            let Some((mapping, rest)) = mappings
                .iter()
                .find_map(|m| m.strip(&name).map(|rest| (m, rest)))
            else {
                tracing::trace!(entry = %name, "Skipping entry outside requested paths");
                continue;
            };
            let target = if rest.is_empty() {
                mapping.disk.clone()
            } else {
                mapping.disk.join(rest)
            };

            let entry_type = entry.header().entry_type();
            if entry_type.is_hard_link() {
                return Err(Error::UnsafeEntry { entry: name });
            }
            reject_linked_parents(&mapping.disk, rest, &name)?;
            if entry_type.is_symlink() {
                let link = entry
                    .link_name()
                    .map_err(|e| Error::io(e, archive, "link name"))?
                    .ok_or_else(|| Error::UnsafeEntry {
                        entry: name.clone(),
                    })?;
                check_link_target(&mapping.disk, &target, &link, &name)?;
            }
            // Never write through a link left behind on disk
            if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(&target).map_err(|e| Error::io(e, &target, "remove link"))?;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            let is_file = entry_type.is_file();
            let size = entry.size();
            entry
                .unpack(&target)
                .map_err(|e| Error::io(e, &target, "unpack"))?;
            extracted_entries += 1;
            if is_file {
                extracted_bytes += size;
            }
        }
        Ok((extracted_bytes, extracted_entries))
    }
}

impl ArchiveCodec for TarZstdCodec {
    fn compression(&self) -> &'static str {
        "zstd"
    }

    fn extension(&self) -> &'static str {
        "tar.zst"
    }

    fn build(
        &self,
        working_dir: &Path,
        paths: &[String],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArchiveInfo> {
        let start = Instant::now();
        check_cancelled(cancel)?;
        let mappings = paths
            .iter()
            .map(|p| PathMapping::new(working_dir, p))
            .collect::<Result<Vec<_>>>()?;

        let (written_bytes, written_entries) = self
            .write_archive(&mappings, dest, cancel)
            .map_err(|e| if cancel.is_cancelled() { Error::Cancelled } else { e })?;

        let (size, sha256_sum) = hash_file(dest)?;
        let info = ArchiveInfo {
            archive_path: dest.to_path_buf(),
            size,
            written_bytes,
            written_entries,
            sha256_sum,
            duration: start.elapsed(),
        };
        tracing::debug!(
            archive = %dest.display(),
            size = info.size,
            entries = info.written_entries,
            bytes = info.written_bytes,
            "Built archive"
        );
        Ok(info)
    }

    fn extract(
        &self,
        working_dir: &Path,
        archive: &Path,
        paths: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExtractInfo> {
        let start = Instant::now();
        check_cancelled(cancel)?;
        let mappings = paths
            .iter()
            .map(|p| PathMapping::new(working_dir, p))
            .collect::<Result<Vec<_>>>()?;

        let (extracted_bytes, extracted_entries) = Self::unpack_archive(&mappings, archive, cancel)
            .map_err(|e| if cancel.is_cancelled() { Error::Cancelled } else { e })?;

        let info = ExtractInfo {
            extracted_bytes,
            extracted_entries,
            duration: start.elapsed(),
        };
        tracing::debug!(
            archive = %archive.display(),
            entries = info.extracted_entries,
            bytes = info.extracted_bytes,
            "Extracted archive"
        );
        Ok(info)
    }
}

/// Reader or writer that starts failing once its token is cancelled, so a
/// large file stops streaming mid-copy.
struct Interruptible<'c, T> {
    inner: T,
    cancel: &'c CancellationToken,
}

impl<'c, T> Interruptible<'c, T> {
    const fn new(inner: T, cancel: &'c CancellationToken) -> Self {
        Self { inner, cancel }
    }

    fn into_inner(self) -> T {
        self.inner
    }

    fn check(&self) -> io::Result<()> {
        // Not ErrorKind::Interrupted: std retries those
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("cancelled"));
        }
        Ok(())
    }
}

impl<T: Read> Read for Interruptible<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}

impl<T: Write> Write for Interruptible<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn entry_name(prefix: &str, rel: &Path, spec: &str) -> Result<String> {
    let mut name = prefix.to_string();
    for component in rel.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        let part = part
            .to_str()
            .ok_or_else(|| Error::invalid_path(spec, "contains a non UTF-8 file name"))?;
        name.push('/');
        name.push_str(part);
    }
    Ok(name)
}

/// Reject absolute names and `..`; return the `/`-joined name
fn safe_entry_name(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafeEntry {
                    entry: path.display().to_string(),
                });
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::UnsafeEntry {
            entry: path.display().to_string(),
        });
    }
    Ok(parts.join("/"))
}

/// Fail if any directory between `root` and the entry is a symlink on disk.
///
/// An earlier entry (or a stale checkout) may have planted a link there, and
/// writing beneath it would land outside `root`.
fn reject_linked_parents(root: &Path, rest: &str, entry: &str) -> Result<()> {
    let mut current = root.to_path_buf();
    let mut parts = rest.split('/').filter(|p| !p.is_empty()).peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        current.push(part);
        if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(Error::UnsafeEntry {
                entry: entry.to_string(),
            });
        }
    }
    Ok(())
}

/// Symlink targets must be relative and resolve inside the mapped path
/// (or beside it, when the mapped path is itself the link).
fn check_link_target(root: &Path, target: &Path, link: &Path, entry: &str) -> Result<()> {
    let escapes = || Error::UnsafeEntry {
        entry: format!("{entry} -> {}", link.display()),
    };
    if link.as_os_str().is_empty() || link.has_root() {
        return Err(escapes());
    }
    let base = if target == root {
        root.parent().unwrap_or(root)
    } else {
        root
    };
    let resolved = target
        .parent()
        .and_then(|dir| normalize(&dir.join(link)))
        .ok_or_else(escapes)?;
    let base = normalize(base).ok_or_else(escapes)?;
    if resolved.starts_with(&base) {
        Ok(())
    } else {
        Err(escapes())
    }
}

/// Lexically resolve `.` and `..`; `None` if `..` climbs past the root
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn build(work: &Path, paths: &[&str], dest: &Path) -> ArchiveInfo {
        let paths: Vec<String> = paths.iter().map(|s| (*s).to_string()).collect();
        TarZstdCodec::default()
            .build(work, &paths, dest, &CancellationToken::new())
            .unwrap()
    }

    fn extract(work: &Path, archive: &Path, paths: &[&str]) -> Result<ExtractInfo> {
        let paths: Vec<String> = paths.iter().map(|s| (*s).to_string()).collect();
        TarZstdCodec::default().extract(work, archive, &paths, &CancellationToken::new())
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let decoder = zstd::Decoder::new(fs::File::open(archive).unwrap()).unwrap();
        let mut tar = tar::Archive::new(decoder);
        tar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    /// Entries for a hand-built archive
    enum Crafted<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8]),
        Symlink(&'a str, &'a str),
        HardLink(&'a str, &'a str),
    }

    fn craft(dest: &Path, entries: &[Crafted<'_>]) {
        let encoder = zstd::Encoder::new(fs::File::create(dest).unwrap(), 3).unwrap();
        let mut builder = tar::Builder::new(encoder);
        for entry in entries {
            let mut header = tar::Header::new_gnu();
            header.set_mode(0o755);
            match entry {
                Crafted::Dir(name) => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
                Crafted::File(name, data) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(data.len() as u64);
                    builder.append_data(&mut header, name, *data).unwrap();
                }
                Crafted::Symlink(name, target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    builder.append_link(&mut header, name, target).unwrap();
                }
                Crafted::HardLink(name, target) => {
                    header.set_entry_type(tar::EntryType::Link);
                    header.set_size(0);
                    builder.append_link(&mut header, name, target).unwrap();
                }
            }
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn build_reports_metrics() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        write(&work.join("vendor/a.txt"), "hello");
        write(&work.join("vendor/sub/b.txt"), "world!");
        write(&work.join("go.sum"), "sum");
        let dest = tmp.path().join("cache.tar.zst");

        let info = build(&work, &["vendor", "go.sum"], &dest);

        assert_eq!(info.archive_path, dest);
        assert_eq!(info.written_bytes, 5 + 6 + 3);
        // vendor, vendor/a.txt, vendor/sub, vendor/sub/b.txt, go.sum
        assert_eq!(info.written_entries, 5);
        assert_eq!(info.size, fs::metadata(&dest).unwrap().len());
        assert_eq!(info.sha256_sum.len(), 64);
        assert_eq!(
            entry_names(&dest),
            vec![
                "vendor",
                "vendor/a.txt",
                "vendor/sub",
                "vendor/sub/b.txt",
                "go.sum"
            ]
        );
    }

    #[test]
    fn round_trip_restores_requested_paths() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        write(&work.join("node_modules/pkg/index.js"), "module.exports = 1;");
        write(&work.join(".cache/x"), "x");
        let dest = tmp.path().join("a.tar.zst");
        build(&work, &["node_modules", ".cache"], &dest);

        let restore = tmp.path().join("restore");
        fs::create_dir(&restore).unwrap();
        let info = extract(&restore, &dest, &["node_modules"]).unwrap();

        assert_eq!(
            fs::read_to_string(restore.join("node_modules/pkg/index.js")).unwrap(),
            "module.exports = 1;"
        );
        assert!(!restore.join(".cache").exists());
        assert_eq!(info.extracted_entries, 3);
        assert_eq!(info.extracted_bytes, 19);
    }

    #[test]
    fn absolute_paths_round_trip_through_root_prefix() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside/tool-cache");
        write(&outside.join("bin"), "binary");
        let work = tmp.path().join("work");
        fs::create_dir_all(&work).unwrap();
        let dest = tmp.path().join("a.tar.zst");
        let spec = outside.to_string_lossy().into_owned();

        build(&work, &[spec.as_str()], &dest);
        assert!(entry_names(&dest).iter().all(|n| n.starts_with("__root__/")));

        fs::remove_dir_all(&outside).unwrap();
        extract(&work, &dest, &[spec.as_str()]).unwrap();
        assert_eq!(fs::read_to_string(outside.join("bin")).unwrap(), "binary");
    }

    #[test]
    fn single_file_path_round_trips() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        write(&work.join("build/out.bin"), "payload");
        let dest = tmp.path().join("a.tar.zst");
        build(&work, &["build/out.bin"], &dest);

        let restore = tmp.path().join("restore");
        extract(&restore, &dest, &["build/out.bin"]).unwrap();
        assert_eq!(fs::read_to_string(restore.join("build/out.bin")).unwrap(), "payload");
    }

    #[test]
    fn extraction_rejects_parent_entries() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("evil.tar.zst");
        {
            let encoder = zstd::Encoder::new(fs::File::create(&dest).unwrap(), 3).unwrap();
            let mut builder = tar::Builder::new(encoder);
            let data = b"pwned";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            // Write the raw name so the builder does not sanitize it
            header.as_old_mut().name[..9].copy_from_slice(b"../escape");
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let work = tmp.path().join("work");
        fs::create_dir(&work).unwrap();
        let err = extract(&work, &dest, &["anything"]).unwrap_err();

        assert!(matches!(err, Error::UnsafeEntry { .. }));
        assert!(!tmp.path().join("escape").exists());
    }

    #[test]
    fn absolute_symlink_cannot_redirect_later_entries() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        let dest = tmp.path().join("evil.tar.zst");
        let outside_str = outside.to_string_lossy().into_owned();
        craft(
            &dest,
            &[
                Crafted::Dir("vendor"),
                Crafted::Symlink("vendor/link", &outside_str),
                Crafted::File("vendor/link/evil.txt", b"pwned"),
            ],
        );

        let work = tmp.path().join("work");
        fs::create_dir(&work).unwrap();
        let err = extract(&work, &dest, &["vendor"]).unwrap_err();

        assert!(matches!(err, Error::UnsafeEntry { .. }), "{err:?}");
        assert!(!outside.join("evil.txt").exists());
        assert!(fs::symlink_metadata(work.join("vendor/link")).is_err());
    }

    #[test]
    fn relative_symlink_escaping_the_path_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("evil.tar.zst");
        craft(
            &dest,
            &[
                Crafted::Dir("vendor"),
                Crafted::Symlink("vendor/link", "../../outside"),
                Crafted::File("vendor/link/evil.txt", b"pwned"),
            ],
        );

        let work = tmp.path().join("work");
        fs::create_dir(&work).unwrap();
        let err = extract(&work, &dest, &["vendor"]).unwrap_err();

        assert!(matches!(err, Error::UnsafeEntry { .. }), "{err:?}");
        assert!(!tmp.path().join("outside/evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn entries_below_an_in_tree_symlink_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("evil.tar.zst");
        craft(
            &dest,
            &[
                Crafted::Dir("vendor"),
                Crafted::Dir("vendor/real"),
                Crafted::Symlink("vendor/link", "real"),
                Crafted::File("vendor/link/evil.txt", b"pwned"),
            ],
        );

        let work = tmp.path().join("work");
        fs::create_dir(&work).unwrap();
        let err = extract(&work, &dest, &["vendor"]).unwrap_err();

        assert!(matches!(err, Error::UnsafeEntry { .. }), "{err:?}");
        assert!(!work.join("vendor/real/evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn stale_symlink_on_disk_is_not_written_through() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        write(&outside.join("keep.txt"), "untouched");
        let work = tmp.path().join("work");
        fs::create_dir_all(work.join("dir")).unwrap();
        std::os::unix::fs::symlink(outside.join("keep.txt"), work.join("dir/keep.txt")).unwrap();

        let dest = tmp.path().join("a.tar.zst");
        craft(
            &dest,
            &[Crafted::Dir("dir"), Crafted::File("dir/keep.txt", b"cached")],
        );
        extract(&work, &dest, &["dir"]).unwrap();

        assert_eq!(fs::read_to_string(outside.join("keep.txt")).unwrap(), "untouched");
        let restored = work.join("dir/keep.txt");
        assert!(!fs::symlink_metadata(&restored).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&restored).unwrap(), "cached");
    }

    #[test]
    fn hard_links_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("evil.tar.zst");
        craft(
            &dest,
            &[
                Crafted::Dir("vendor"),
                Crafted::HardLink("vendor/passwd", "etc/passwd"),
            ],
        );

        let work = tmp.path().join("work");
        fs::create_dir(&work).unwrap();
        let err = extract(&work, &dest, &["vendor"]).unwrap_err();
        assert!(matches!(err, Error::UnsafeEntry { .. }), "{err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn sibling_relative_symlinks_are_allowed() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("a.tar.zst");
        craft(
            &dest,
            &[
                Crafted::Dir("node_modules"),
                Crafted::Dir("node_modules/pkg"),
                Crafted::File("node_modules/pkg/cli.js", b"#!/usr/bin/env node"),
                Crafted::Dir("node_modules/.bin"),
                Crafted::Symlink("node_modules/.bin/cli", "../pkg/cli.js"),
            ],
        );

        let work = tmp.path().join("work");
        fs::create_dir(&work).unwrap();
        let info = extract(&work, &dest, &["node_modules"]).unwrap();

        assert_eq!(info.extracted_entries, 5);
        assert_eq!(
            fs::read_to_string(work.join("node_modules/.bin/cli")).unwrap(),
            "#!/usr/bin/env node"
        );
    }

    #[test]
    fn missing_path_fails_build() {
        let tmp = TempDir::new().unwrap();
        let err = TarZstdCodec::default()
            .build(
                tmp.path(),
                &["does-not-exist".to_string()],
                &tmp.path().join("a.tar.zst"),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn cancelled_token_stops_build_and_extract() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        write(&work.join("vendor/a.txt"), "hello");
        let dest = tmp.path().join("a.tar.zst");
        build(&work, &["vendor"], &dest);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let codec = TarZstdCodec::default();
        let paths = vec!["vendor".to_string()];

        let err = codec
            .build(&work, &paths, &tmp.path().join("b.tar.zst"), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let restore = tmp.path().join("restore");
        let err = codec.extract(&restore, &dest, &paths, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!restore.join("vendor").exists());
    }

    #[test]
    fn cancellation_stops_a_stream_mid_copy() {
        let cancel = CancellationToken::new();
        let mut reader = Interruptible::new(&b"abcdef"[..], &cancel);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        cancel.cancel();
        assert!(reader.read(&mut buf).is_err());
        let mut writer = Interruptible::new(Vec::new(), &cancel);
        assert!(writer.write(b"x").is_err());
        assert!(writer.into_inner().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_stored_as_links() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        write(&work.join("dir/real.txt"), "real");
        std::os::unix::fs::symlink("real.txt", work.join("dir/link.txt")).unwrap();
        let dest = tmp.path().join("a.tar.zst");
        let info = build(&work, &["dir"], &dest);
        assert_eq!(info.written_bytes, 4);

        let restore = tmp.path().join("restore");
        extract(&restore, &dest, &["dir"]).unwrap();
        let link = restore.join("dir/link.txt");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&link).unwrap(), "real");
    }
}
