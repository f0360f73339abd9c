//! Directory-backed blob store
//!
//! Each key maps to `<root>/<key>` with a JSON sidecar at
//! `<root>/<key>.meta.json` recording size, mode, modification time and
//! digest. The sidecar is the source of truth for restoring file attributes
//! on download.

use crate::atomic;
use crate::validate::validate_key;
use crate::{BlobStore, Error, Result, StoreType, TransferInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Instant, SystemTime};

/// Current sidecar schema version
pub const METADATA_VERSION: u32 = 1;

const METADATA_SUFFIX: &str = ".meta.json";

/// Sidecar metadata stored next to every artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Key the artifact was stored under
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time of the uploaded source file
    pub mod_time: DateTime<Utc>,
    /// Unix permission bits of the uploaded source file
    pub mode: u32,
    /// Lowercase hex SHA-256 of the content
    pub sha256: String,
    /// When the artifact was stored
    pub created_at: DateTime<Utc>,
    /// Sidecar schema version
    pub version: u32,
}

/// Blob store rooted at a local (or network-mounted) directory
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `root` is the filesystem root or the
    /// current directory, or an I/O error if it cannot be created.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if is_forbidden_root(root) {
            return Err(Error::configuration(format!(
                "refusing to use {} as a local store root",
                root.display()
            )));
        }
        fs::create_dir_all(root).map_err(|e| Error::io(e, root, "create_dir_all"))?;
        let canonical = root
            .canonicalize()
            .map_err(|e| Error::io(e, root, "canonicalize"))?;
        if canonical.parent().is_none() {
            return Err(Error::configuration(format!(
                "{} resolves to the filesystem root",
                root.display()
            )));
        }
        tracing::debug!(root = %canonical.display(), "Opened local file store");
        Ok(Self { root: canonical })
    }

    /// Store root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the sidecar for `key`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad keys, [`Error::NotFound`] if no
    /// sidecar exists, or an I/O error if it cannot be parsed.
    pub fn metadata(&self, key: &str) -> Result<FileMetadata> {
        let path = metadata_path(&self.data_path(key)?);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    backend: StoreType::LocalFile,
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::io(io::Error::new(io::ErrorKind::InvalidData, e), &path, "parse"))
    }

    fn data_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        if key.ends_with(METADATA_SUFFIX) {
            return Err(Error::invalid_key(
                key,
                format!("keys ending in {METADATA_SUFFIX} are reserved"),
            ));
        }
        let path = key.split('/').fold(self.root.clone(), |p, seg| p.join(seg));
        if !path.starts_with(&self.root)
            || path.components().any(|c| c == Component::ParentDir)
        {
            return Err(Error::invalid_key(key, "key escapes the store root"));
        }
        Ok(path)
    }

    fn upload_blocking(&self, source: &Path, key: &str) -> Result<TransferInfo> {
        let data_path = self.data_path(key)?;
        let start = Instant::now();

        let file = fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
        let source_meta = file.metadata().map_err(|e| Error::io(e, source, "stat"))?;
        if !source_meta.is_file() {
            return Err(Error::io(
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
                source,
                "open",
            ));
        }

        let outcome = atomic::write_atomic(&data_path, &file)?;

        let metadata = FileMetadata {
            key: key.to_string(),
            size: outcome.size,
            mod_time: source_meta
                .modified()
                .map_or_else(|_| Utc::now(), DateTime::<Utc>::from),
            mode: file_mode(&source_meta),
            sha256: outcome.sha256,
            created_at: Utc::now(),
            version: METADATA_VERSION,
        };
        let meta_path = metadata_path(&data_path);
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| Error::io(io::Error::other(e), &meta_path, "serialize"))?;
        atomic::write_bytes_atomic(&meta_path, &json)?;

        tracing::debug!(
            key,
            path = %data_path.display(),
            bytes = metadata.size,
            "Stored artifact"
        );
        Ok(TransferInfo::new(metadata.size, start.elapsed()))
    }

    fn download_blocking(&self, key: &str, dest: &Path) -> Result<TransferInfo> {
        let data_path = self.data_path(key)?;
        let start = Instant::now();

        let file = match fs::File::open(&data_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    backend: StoreType::LocalFile,
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(Error::io(e, &data_path, "open")),
        };

        let metadata = match self.metadata(key) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(key, error = %e, "Artifact metadata unavailable; attributes not restored");
                None
            }
        };

        let outcome = atomic::write_atomic(dest, &file)?;
        if let Some(meta) = &metadata {
            restore_attributes(dest, meta);
        }

        tracing::debug!(key, dest = %dest.display(), bytes = outcome.size, "Fetched artifact");
        Ok(TransferInfo::new(outcome.size, start.elapsed()))
    }
}

#[async_trait]
impl BlobStore for LocalFileStore {
    fn store_type(&self) -> StoreType {
        StoreType::LocalFile
    }

    async fn upload(&self, source: &Path, key: &str) -> Result<TransferInfo> {
        let store = self.clone();
        let source = source.to_path_buf();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.upload_blocking(&source, &key))
            .await
            .map_err(|e| Error::transfer(StoreType::LocalFile, format!("upload task failed: {e}")))?
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<TransferInfo> {
        let store = self.clone();
        let dest = dest.to_path_buf();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.download_blocking(&key, &dest))
            .await
            .map_err(|e| {
                Error::transfer(StoreType::LocalFile, format!("download task failed: {e}"))
            })?
    }
}

fn metadata_path(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_os_string();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

fn is_forbidden_root(root: &Path) -> bool {
    let mut components = root.components().filter(|c| *c != Component::CurDir);
    match (components.next(), components.next()) {
        (None, _) => true,
        (Some(Component::RootDir), None) => true,
        (Some(Component::Prefix(_)), None) => true,
        (Some(Component::Prefix(_)), Some(Component::RootDir)) => components.next().is_none(),
        _ => false,
    }
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Restore modification time and permissions; failures are logged only.
fn restore_attributes(dest: &Path, meta: &FileMetadata) {
    let mtime = SystemTime::from(meta.mod_time);
    if let Err(e) = fs::File::options()
        .write(true)
        .open(dest)
        .and_then(|f| f.set_modified(mtime))
    {
        tracing::warn!(path = %dest.display(), error = %e, "Failed to restore modification time");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dest, fs::Permissions::from_mode(meta.mode)) {
            tracing::warn!(path = %dest.display(), error = %e, "Failed to restore permissions");
        }
    }
}
