//! Save and restore orchestration
//!
//! Save: resolve templates, check the paths exist, peek the registry, build
//! the archive, create the registry entry, upload, commit.
//!
//! Restore: resolve templates, retrieve from the registry (primary key or a
//! server-chosen fallback), download into a temporary directory, extract the
//! requested paths.
//!
//! Network phases stop as soon as the cancellation token fires. Archive
//! phases run on a blocking thread with a clone of the token, which the codec
//! checks between entries and while streaming. Temporary archives live in a
//! [`tempfile::TempDir`] that is removed on every exit path.

use crate::{CacheConfig, Error, ExpandedCache, Phase, RestoreResult, Result, SaveResult};
use cistash_archive::{ArchiveCodec, TarZstdCodec, paths};
use cistash_keys::{KeyResolver, platform};
use cistash_registry::{CacheRegistry, CreateRequest, RetrieveRequest};
use cistash_store::{StoreSet, StoreType};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Pipeline identity reported to the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    /// Branch being built
    pub branch: String,
    /// Pipeline slug
    pub pipeline: String,
    /// Organization slug
    pub organization: String,
}

/// Save/restore orchestrator.
///
/// Cloning is cheap; clones share the registry client, stores, codec and
/// cancellation token.
#[derive(Clone)]
pub struct Cache {
    pub(crate) registry: Arc<dyn CacheRegistry>,
    pub(crate) stores: Arc<StoreSet>,
    pub(crate) codec: Arc<dyn ArchiveCodec>,
    pub(crate) resolver: KeyResolver,
    pub(crate) build: BuildContext,
    pub(crate) default_registry: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) temp_root: Option<PathBuf>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("stores", &self.stores)
            .field("codec", &self.codec)
            .field("working_dir", &self.resolver.working_dir())
            .field("build", &self.build)
            .field("default_registry", &self.default_registry)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Create an orchestrator using the tar/zstd codec
    #[must_use]
    pub fn new(registry: Arc<dyn CacheRegistry>, stores: StoreSet, resolver: KeyResolver) -> Self {
        Self {
            registry,
            stores: Arc::new(stores),
            codec: Arc::new(TarZstdCodec::default()),
            resolver,
            build: BuildContext::default(),
            default_registry: String::new(),
            cancel: CancellationToken::new(),
            temp_root: None,
        }
    }

    /// Use a different archive codec
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn ArchiveCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set the pipeline identity sent to the registry
    #[must_use]
    pub fn with_build_context(mut self, build: BuildContext) -> Self {
        self.build = build;
        self
    }

    /// Registry slug for caches that do not name one
    #[must_use]
    pub fn with_default_registry(mut self, registry: impl Into<String>) -> Self {
        self.default_registry = registry.into();
        self
    }

    /// Observe `token` for cancellation
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Create temporary archives under `dir` instead of the system temp dir
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    /// Working directory paths and checksums are resolved against
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.resolver.working_dir()
    }

    /// Resolve a configuration without touching the network.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is incomplete or a
    /// template is invalid.
    pub fn expand(&self, config: &CacheConfig) -> Result<ExpandedCache> {
        config.expand(&self.resolver)
    }

    /// Save one cache.
    ///
    /// Returns `cache_created == false` without building anything when the
    /// registry already has the key.
    ///
    /// # Errors
    ///
    /// Returns an error attributed to the failing [`Phase`]. A missing path
    /// fails before any network call.
    #[instrument(skip_all, fields(cache = %config.id))]
    pub async fn save(&self, config: &CacheConfig) -> Result<SaveResult> {
        let start = Instant::now();
        self.check_cancelled(&config.id, Phase::Prepare)?;

        let cache = self.expand(config)?;
        let id = cache.id.as_str();
        self.check_paths_exist(&cache)?;
        let registry = self.registry_for(&cache)?;

        let existing = self
            .network(id, Phase::Peek, self.registry.peek(&registry, &cache.key, &self.build.branch))
            .await?;
        if existing.is_some() {
            info!(key = %cache.key, "Cache entry already exists; skipping save");
            return Ok(SaveResult {
                id: cache.id.clone(),
                key: cache.key.clone(),
                fallback_keys: cache.fallback_keys.clone(),
                registry,
                cache_created: false,
                archive: None,
                transfer: None,
                store: None,
                store_object_name: None,
                duration: start.elapsed(),
            });
        }

        let temp_dir = self.temp_dir(id, Phase::Archive)?;
        let archive_path = temp_dir
            .path()
            .join(format!("archive.{}", self.codec.extension()));
        let archive = {
            let codec = Arc::clone(&self.codec);
            let working_dir = self.working_dir().to_path_buf();
            let paths = cache.paths.clone();
            let dest = archive_path.clone();
            self.blocking(id, Phase::Archive, move |cancel| {
                codec.build(&working_dir, &paths, &dest, &cancel)
            })
            .await?
        };
        debug!(size = archive.size, sha256 = %archive.sha256_sum, "Archive built");

        let request = CreateRequest {
            key: cache.key.clone(),
            fallback_keys: cache.fallback_keys.clone(),
            compression: self.codec.compression().to_string(),
            file_size: archive.size,
            digest: archive.sha256_sum.clone(),
            paths: cache.paths.clone(),
            platform: platform::platform(),
            pipeline: self.build.pipeline.clone(),
            branch: self.build.branch.clone(),
            owner: self.build.organization.clone(),
        };
        let created = self
            .network(id, Phase::Create, self.registry.create(&registry, &request))
            .await?;

        let store_type = self.store_type(id, Phase::Create, created.store.as_deref())?;
        let store = self
            .stores
            .open(store_type)
            .await
            .map_err(|source| store_error(id, Phase::Upload, source))?;

        let transfer = self
            .cancellable(
                id,
                Phase::Upload,
                store.upload(&archive_path, &created.store_object_name),
            )
            .await?
            .map_err(|source| store_error(id, Phase::Upload, source))?;
        info!(
            store = %store_type,
            object = %created.store_object_name,
            bytes = transfer.bytes_transferred,
            mb_per_sec = transfer.transfer_speed,
            "Uploaded cache archive"
        );

        self.network(id, Phase::Commit, self.registry.commit(&registry, &created.upload_id))
            .await?;
        info!(key = %cache.key, "Cache saved");

        drop(temp_dir);
        Ok(SaveResult {
            id: cache.id.clone(),
            key: cache.key.clone(),
            fallback_keys: cache.fallback_keys.clone(),
            registry,
            cache_created: true,
            archive: Some(archive),
            transfer: Some(transfer),
            store: Some(store_type),
            store_object_name: Some(created.store_object_name),
            duration: start.elapsed(),
        })
    }

    /// Restore one cache.
    ///
    /// A miss is not an error: it returns `cache_restored == false`.
    ///
    /// # Errors
    ///
    /// Returns an error attributed to the failing [`Phase`].
    #[instrument(skip_all, fields(cache = %config.id))]
    pub async fn restore(&self, config: &CacheConfig) -> Result<RestoreResult> {
        let start = Instant::now();
        self.check_cancelled(&config.id, Phase::Prepare)?;

        let cache = self.expand(config)?;
        let id = cache.id.as_str();
        let registry = self.registry_for(&cache)?;

        let request = RetrieveRequest {
            key: cache.key.clone(),
            branch: self.build.branch.clone(),
            fallback_keys: cache.fallback_keys.clone(),
        };
        let found = self
            .network(id, Phase::Retrieve, self.registry.retrieve(&registry, &request))
            .await?;

        let Some(hit) = found else {
            info!(key = %cache.key, "Cache miss");
            return Ok(RestoreResult {
                id: cache.id.clone(),
                requested_key: cache.key.clone(),
                key: cache.key.clone(),
                registry,
                cache_restored: false,
                cache_hit: false,
                fallback_used: false,
                expires_at: None,
                store: None,
                transfer: None,
                extract: None,
                duration: start.elapsed(),
            });
        };

        let store_type = self.store_type(id, Phase::Retrieve, Some(&hit.store))?;
        let store = self
            .stores
            .open(store_type)
            .await
            .map_err(|source| store_error(id, Phase::Download, source))?;

        let temp_dir = self.temp_dir(id, Phase::Download)?;
        let archive_path = temp_dir
            .path()
            .join(format!("archive.{}", self.codec.extension()));
        let transfer = self
            .cancellable(
                id,
                Phase::Download,
                store.download(&hit.store_object_name, &archive_path),
            )
            .await?
            .map_err(|source| store_error(id, Phase::Download, source))?;
        debug!(
            store = %store_type,
            object = %hit.store_object_name,
            bytes = transfer.bytes_transferred,
            "Downloaded cache archive"
        );

        let extract = {
            let codec = Arc::clone(&self.codec);
            let working_dir = self.working_dir().to_path_buf();
            let paths = cache.paths.clone();
            let archive = archive_path.clone();
            self.blocking(id, Phase::Extract, move |cancel| {
                codec.extract(&working_dir, &archive, &paths, &cancel)
            })
            .await?
        };
        drop(temp_dir);

        if hit.fallback {
            info!(requested = %cache.key, matched = %hit.key, "Cache restored from fallback key");
        } else {
            info!(key = %hit.key, "Cache hit");
        }
        Ok(RestoreResult {
            id: cache.id.clone(),
            requested_key: cache.key.clone(),
            key: hit.key,
            registry,
            cache_restored: true,
            cache_hit: !hit.fallback,
            fallback_used: hit.fallback,
            expires_at: hit.expires_at,
            store: Some(store_type),
            transfer: Some(transfer),
            extract: Some(extract),
            duration: start.elapsed(),
        })
    }

    fn registry_for(&self, cache: &ExpandedCache) -> Result<String> {
        let registry = if cache.registry.is_empty() {
            self.default_registry.trim()
        } else {
            cache.registry.as_str()
        };
        if registry.is_empty() {
            return Err(Error::configuration(
                &cache.id,
                "no registry configured for this cache",
            ));
        }
        Ok(registry.to_string())
    }

    /// Store named by the registry, or the default store when the tag is
    /// missing or empty
    fn store_type(&self, id: &str, phase: Phase, tag: Option<&str>) -> Result<StoreType> {
        match tag.map(str::trim).filter(|s| !s.is_empty()) {
            Some(tag) => parse_store(id, phase, tag),
            None => self
                .stores
                .default_type()
                .ok_or_else(|| Error::configuration(id, "no blob store configured")),
        }
    }

    fn temp_dir(&self, id: &str, phase: Phase) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cistash-");
        match &self.temp_root {
            Some(root) => builder
                .tempdir_in(root)
                .map_err(|e| Error::io(id, phase, e, root, "create temp dir")),
            None => builder
                .tempdir()
                .map_err(|e| Error::io(id, phase, e, std::env::temp_dir(), "create temp dir")),
        }
    }

    fn check_paths_exist(&self, cache: &ExpandedCache) -> Result<()> {
        for path in &cache.paths {
            let disk = paths::resolve(self.working_dir(), path)
                .map_err(|e| Error::configuration(&cache.id, e.to_string()))?;
            if std::fs::symlink_metadata(&disk).is_err() {
                return Err(Error::MissingPath {
                    id: cache.id.clone(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_cancelled(&self, id: &str, phase: Phase) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                id: id.to_string(),
                phase,
            });
        }
        Ok(())
    }

    /// Race `fut` against cancellation
    async fn cancellable<T>(
        &self,
        id: &str,
        phase: Phase,
        fut: impl Future<Output = T>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled { id: id.to_string(), phase }),
            value = fut => Ok(value),
        }
    }

    /// Registry call with cancellation and phase attribution
    async fn network<T>(
        &self,
        id: &str,
        phase: Phase,
        fut: impl Future<Output = cistash_registry::Result<T>>,
    ) -> Result<T> {
        self.cancellable(id, phase, fut)
            .await?
            .map_err(|source| Error::Registry {
                id: id.to_string(),
                phase,
                source,
            })
    }

    /// Run a codec operation on the blocking pool.
    ///
    /// The operation gets a clone of the cancellation token and is awaited to
    /// completion, so it has stopped touching the temp dir before the caller
    /// drops it.
    async fn blocking<T, F>(&self, id: &str, phase: Phase, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> cistash_archive::Result<T> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || op(cancel))
            .await
            .map_err(|e| Error::Task {
                id: id.to_string(),
                message: e.to_string(),
            })?;
        let value = outcome.map_err(|source| match source {
            cistash_archive::Error::Cancelled => Error::Cancelled {
                id: id.to_string(),
                phase,
            },
            source => Error::Archive {
                id: id.to_string(),
                phase,
                source,
            },
        })?;
        self.check_cancelled(id, phase)?;
        Ok(value)
    }
}

fn parse_store(id: &str, phase: Phase, tag: &str) -> Result<StoreType> {
    tag.parse().map_err(|_| Error::UnknownStore {
        id: id.to_string(),
        phase,
        store: tag.to_string(),
    })
}

fn store_error(id: &str, phase: Phase, source: cistash_store::Error) -> Error {
    Error::Store {
        id: id.to_string(),
        phase,
        source,
    }
}

