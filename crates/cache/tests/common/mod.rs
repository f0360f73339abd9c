//! Shared fixtures: an in-memory registry and counting wrappers

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cistash_archive::{ArchiveCodec, ArchiveInfo, ExtractInfo, TarZstdCodec};
use cistash_cache::{BuildContext, Cache, CacheConfig};
use cistash_keys::KeyResolver;
use cistash_registry::{
    CacheRegistry, CommitResponse, CreateRequest, CreateResponse, Error as RegistryError,
    PeekResponse, RetrieveRequest, RetrieveResponse,
};
use cistash_store::{
    BlobStore, Error as StoreError, LocalFileStore, StoreSet, StoreType, TransferInfo,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Entry {
    object: String,
    store: StoreType,
}

/// Registry that keeps committed entries in memory.
///
/// Fallback keys match exactly, in the order given. Keys containing
/// `broken` fail retrieval with a server error. The `fail_*` switches make
/// the matching call return a server error; `blank_store` answers create
/// and retrieve with an empty store tag.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    committed: Mutex<HashMap<String, Entry>>,
    pending: Mutex<HashMap<String, (String, Entry)>>,
    pub calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_commit: AtomicBool,
    pub blank_store: AtomicBool,
}

impl MemoryRegistry {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(op)).count()
    }

    pub fn committed_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.committed.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn store_tag(&self, store: StoreType) -> String {
        if self.blank_store.load(Ordering::SeqCst) {
            String::new()
        } else {
            store.to_string()
        }
    }
}

fn server_error() -> RegistryError {
    RegistryError::UnexpectedStatus {
        status: 500,
        body: "internal error".to_string(),
    }
}

#[async_trait]
impl CacheRegistry for MemoryRegistry {
    async fn peek(
        &self,
        registry: &str,
        key: &str,
        _branch: &str,
    ) -> cistash_registry::Result<Option<PeekResponse>> {
        self.record(format!("peek {registry} {key}"));
        Ok(self
            .committed
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| PeekResponse {
                key: key.to_string(),
                store: entry.store.to_string(),
                ..PeekResponse::default()
            }))
    }

    async fn create(
        &self,
        registry: &str,
        request: &CreateRequest,
    ) -> cistash_registry::Result<CreateResponse> {
        self.record(format!("create {registry} {}", request.key));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("upload-{n}");
        let object = format!("objects/{n}.tar.zst");
        self.pending.lock().unwrap().insert(
            upload_id.clone(),
            (
                request.key.clone(),
                Entry {
                    object: object.clone(),
                    store: StoreType::LocalFile,
                },
            ),
        );
        Ok(CreateResponse {
            upload_id,
            store_object_name: object,
            multipart: false,
            upload_instructions: Vec::new(),
            store: Some(self.store_tag(StoreType::LocalFile)),
        })
    }

    async fn commit(
        &self,
        registry: &str,
        upload_id: &str,
    ) -> cistash_registry::Result<CommitResponse> {
        self.record(format!("commit {registry} {upload_id}"));
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        let (key, entry) = self
            .pending
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| RegistryError::UnexpectedStatus {
                status: 404,
                body: "unknown upload".to_string(),
            })?;
        self.committed.lock().unwrap().insert(key, entry);
        Ok(CommitResponse {
            message: "committed".to_string(),
        })
    }

    async fn retrieve(
        &self,
        registry: &str,
        request: &RetrieveRequest,
    ) -> cistash_registry::Result<Option<RetrieveResponse>> {
        self.record(format!("retrieve {registry} {}", request.key));
        if request.key.contains("broken") {
            return Err(server_error());
        }
        let committed = self.committed.lock().unwrap();
        let candidates = std::iter::once((&request.key, false))
            .chain(request.fallback_keys.iter().map(|k| (k, true)));
        for (key, fallback) in candidates {
            if let Some(entry) = committed.get(key) {
                return Ok(Some(RetrieveResponse {
                    key: key.clone(),
                    store: self.store_tag(entry.store),
                    fallback,
                    store_object_name: entry.object.clone(),
                    expires_at: None,
                    download_instructions: Vec::new(),
                }));
            }
        }
        Ok(None)
    }
}

/// Codec wrapper counting builds
#[derive(Debug, Default)]
pub struct CountingCodec {
    inner: TarZstdCodec,
    pub builds: AtomicUsize,
}

impl ArchiveCodec for CountingCodec {
    fn compression(&self) -> &'static str {
        self.inner.compression()
    }

    fn extension(&self) -> &'static str {
        self.inner.extension()
    }

    fn build(
        &self,
        working_dir: &Path,
        paths: &[String],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> cistash_archive::Result<ArchiveInfo> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build(working_dir, paths, dest, cancel)
    }

    fn extract(
        &self,
        working_dir: &Path,
        archive: &Path,
        paths: &[String],
        cancel: &CancellationToken,
    ) -> cistash_archive::Result<ExtractInfo> {
        self.inner.extract(working_dir, archive, paths, cancel)
    }
}

/// Store wrapper counting uploads; `fail_uploads` makes them fail
#[derive(Debug)]
pub struct CountingStore {
    inner: LocalFileStore,
    pub uploads: AtomicUsize,
    pub fail_uploads: AtomicBool,
}

#[async_trait]
impl BlobStore for CountingStore {
    fn store_type(&self) -> StoreType {
        StoreType::LocalFile
    }

    async fn upload(&self, source: &Path, key: &str) -> cistash_store::Result<TransferInfo> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Transfer {
                backend: StoreType::LocalFile,
                message: "connection reset".to_string(),
            });
        }
        self.inner.upload(source, key).await
    }

    async fn download(&self, key: &str, dest: &Path) -> cistash_store::Result<TransferInfo> {
        self.inner.download(key, dest).await
    }
}

/// A working directory, a store directory and an orchestrator wired to
/// in-memory fakes
pub struct Fixture {
    pub tmp: TempDir,
    pub work: PathBuf,
    /// Where orchestrators create their temporary archive directories
    pub scratch: PathBuf,
    pub registry: Arc<MemoryRegistry>,
    pub codec: Arc<CountingCodec>,
    pub store: Arc<CountingStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let store = Arc::new(CountingStore {
            inner: LocalFileStore::new(tmp.path().join("store")).unwrap(),
            uploads: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        });
        Self {
            tmp,
            work,
            scratch,
            registry: Arc::new(MemoryRegistry::default()),
            codec: Arc::new(CountingCodec::default()),
            store,
        }
    }

    /// Orchestrator rooted at `dir`
    pub fn cache_in(&self, dir: &Path) -> Cache {
        let env = HashMap::from([("BUILDKITE_BRANCH".to_string(), "main".to_string())]);
        let store: Arc<dyn BlobStore> = self.store.clone();
        let registry: Arc<dyn CacheRegistry> = self.registry.clone();
        let codec: Arc<dyn ArchiveCodec> = self.codec.clone();
        Cache::new(
            registry,
            StoreSet::with_store(store),
            KeyResolver::new(dir).with_env(env),
        )
        .with_codec(codec)
        .with_temp_dir(&self.scratch)
        .with_default_registry("main")
        .with_build_context(BuildContext {
            branch: "main".to_string(),
            pipeline: "build".to_string(),
            organization: "acme".to_string(),
        })
    }

    pub fn cache(&self) -> Cache {
        self.cache_in(&self.work)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.work.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn builds(&self) -> usize {
        self.codec.builds.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.store.uploads.load(Ordering::SeqCst)
    }

    /// Temporary directories left behind under [`Self::scratch`]
    pub fn leftover_temp_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.scratch)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

pub fn config(id: &str, key: &str, fallback_keys: &[&str], paths: &[&str]) -> CacheConfig {
    CacheConfig {
        id: id.to_string(),
        key: key.to_string(),
        fallback_keys: fallback_keys.iter().map(|s| (*s).to_string()).collect(),
        paths: paths.iter().map(|s| (*s).to_string()).collect(),
        ..CacheConfig::default()
    }
}
