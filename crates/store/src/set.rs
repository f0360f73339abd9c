//! Lazily opened collection of configured stores

use crate::{BlobStore, Error, NscOptions, Result, StoreConfig, StoreType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Stores available to the orchestrator, keyed by [`StoreType`].
///
/// Each backend is constructed on first use and reused afterwards. Opening
/// one store type never waits on another. The artifact CLI backend is always
/// available with default settings even when not configured explicitly.
#[derive(Debug)]
pub struct StoreSet {
    configs: HashMap<StoreType, StoreConfig>,
    default: Option<StoreType>,
    opened: HashMap<StoreType, OnceCell<Arc<dyn BlobStore>>>,
}

impl Default for StoreSet {
    fn default() -> Self {
        Self {
            configs: HashMap::new(),
            default: None,
            opened: HashMap::from([(StoreType::Nsc, OnceCell::new())]),
        }
    }
}

impl StoreSet {
    /// Build a set from configurations; the first one becomes the default
    #[must_use]
    pub fn new(configs: impl IntoIterator<Item = StoreConfig>) -> Self {
        let mut set = Self::default();
        for config in configs {
            let store_type = config.store_type();
            set.default.get_or_insert(store_type);
            set.configs.insert(store_type, config);
            set.opened.entry(store_type).or_default();
        }
        set
    }

    /// Build a set around an already constructed store
    #[must_use]
    pub fn with_store(store: Arc<dyn BlobStore>) -> Self {
        let store_type = store.store_type();
        let mut set = Self::default();
        set.default = Some(store_type);
        set.opened.insert(store_type, OnceCell::new_with(Some(store)));
        set
    }

    /// Backend used when the registry does not name one
    #[must_use]
    pub const fn default_type(&self) -> Option<StoreType> {
        self.default
    }

    /// Open (or reuse) the backend for `store_type`.
    ///
    /// Concurrent callers asking for the same type share one construction.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `store_type` is not configured, or
    /// any error from constructing the backend.
    pub async fn open(&self, store_type: StoreType) -> Result<Arc<dyn BlobStore>> {
        let Some(cell) = self.opened.get(&store_type) else {
            return Err(Error::configuration(format!(
                "the registry selected the {store_type} store, but no {store_type} store is configured"
            )));
        };
        let store = cell
            .get_or_try_init(|| async {
                let config = self
                    .configs
                    .get(&store_type)
                    .cloned()
                    .unwrap_or_else(|| StoreConfig::Nsc(NscOptions::default()));
                tracing::debug!(store = %store_type, "Opening blob store");
                config.open().await
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Open the default backend.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no store is configured.
    pub async fn open_default(&self) -> Result<Arc<dyn BlobStore>> {
        let store_type = self
            .default
            .ok_or_else(|| Error::configuration("no blob store configured"))?;
        self.open(store_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, LocalFileStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn opens_configured_store_once() {
        let tmp = TempDir::new().unwrap();
        let set = StoreSet::new([StoreConfig::LocalFile {
            root: tmp.path().join("store"),
        }]);

        assert_eq!(set.default_type(), Some(StoreType::LocalFile));
        let a = set.open(StoreType::LocalFile).await.unwrap();
        let b = set.open_default().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(tmp.path().join("store").is_dir());
    }

    #[tokio::test]
    async fn unconfigured_store_is_configuration_error() {
        let set = StoreSet::new([]);
        let err = set.open(StoreType::S3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(set.open_default().await.is_err());
    }

    #[tokio::test]
    async fn nsc_is_always_available() {
        let set = StoreSet::new([]);
        let store = set.open(StoreType::Nsc).await.unwrap();
        assert_eq!(store.store_type(), StoreType::Nsc);
    }

    #[tokio::test]
    async fn with_store_uses_injected_backend() {
        let tmp = TempDir::new().unwrap();
        let local: Arc<dyn BlobStore> = Arc::new(LocalFileStore::new(tmp.path()).unwrap());
        let set = StoreSet::with_store(Arc::clone(&local));

        let opened = set.open_default().await.unwrap();
        assert!(Arc::ptr_eq(&opened, &local));
    }

    #[tokio::test]
    async fn concurrent_opens_share_one_backend() {
        let tmp = TempDir::new().unwrap();
        let set = StoreSet::new([
            StoreConfig::LocalFile {
                root: tmp.path().join("store"),
            },
            StoreConfig::Nsc(NscOptions::default()),
        ]);

        let (a, b, nsc) = tokio::join!(
            set.open(StoreType::LocalFile),
            set.open(StoreType::LocalFile),
            set.open(StoreType::Nsc),
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(nsc.unwrap().store_type(), StoreType::Nsc);
    }

    #[tokio::test]
    async fn failed_open_can_be_retried() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("store");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let set = StoreSet::new([StoreConfig::LocalFile {
            root: blocker.clone(),
        }]);

        assert!(set.open(StoreType::LocalFile).await.is_err());
        std::fs::remove_file(&blocker).unwrap();
        assert!(set.open(StoreType::LocalFile).await.is_ok());
    }
}
