//! Multi-cache operations

use crate::{Cache, CacheConfig, Error, RestoreResult, Result, SaveResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{Instrument, info_span, warn};

impl Cache {
    /// Save each cache in turn.
    ///
    /// A failing cache does not stop the remaining ones; every entry gets its
    /// own result, in input order.
    pub async fn save_all(&self, configs: &[CacheConfig]) -> Vec<(String, Result<SaveResult>)> {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            let outcome = self.save(config).await;
            if let Err(e) = &outcome {
                warn!(cache = %config.id, phase = ?e.phase(), error = %e, "Cache save failed");
            }
            results.push((config.id.trim().to_string(), outcome));
        }
        results
    }

    /// Restore every cache concurrently.
    ///
    /// Each cache runs in its own task and records its outcome under its ID.
    /// One cache failing never affects another's result. Duplicate IDs are
    /// restored once.
    pub async fn restore_all(&self, configs: &[CacheConfig]) -> BTreeMap<String, Result<RestoreResult>> {
        let results: Arc<Mutex<BTreeMap<String, Result<RestoreResult>>>> =
            Arc::new(Mutex::new(BTreeMap::new()));
        let mut ids = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for config in configs {
            let id = config.id.trim().to_string();
            if !ids.insert(id.clone()) {
                warn!(cache = %id, "Duplicate cache id; restoring it once");
                continue;
            }
            let cache = self.clone();
            let config = config.clone();
            let results = Arc::clone(&results);
            let span = info_span!("restore_task", cache = %id);
            tasks.spawn(
                async move {
                    let outcome = cache.restore(&config).await;
                    if let Err(e) = &outcome {
                        warn!(phase = ?e.phase(), error = %e, "Cache restore failed");
                    }
                    results.lock().await.insert(id, outcome);
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Restore task did not complete");
            }
        }

        let mut collected = std::mem::take(&mut *results.lock().await);
        for id in ids {
            collected.entry(id).or_insert_with_key(|id| {
                Err(Error::Task {
                    id: id.clone(),
                    message: "restore task did not complete".to_string(),
                })
            });
        }
        collected
    }
}
