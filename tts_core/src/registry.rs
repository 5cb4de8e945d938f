//! Lazy cache of loaded model variants.
//!
//! Each catalog key owns a slot holding a [`OnceCell`]. Concurrent first callers
//! for the same key wait on that cell, so at most one load is in flight per key,
//! while different keys load independently. Handles are never evicted.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::catalog::ModelCatalog;
use crate::error::{Result, TtsError};
use crate::model::{ModelHandle, ModelLoader};

type Slot = Arc<OnceCell<ModelHandle>>;

pub struct ModelRegistry {
    catalog: ModelCatalog,
    loader: Arc<dyn ModelLoader>,
    slots: DashMap<String, Slot>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("available", &self.catalog.keys())
            .field("loaded", &self.list_loaded())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(catalog: ModelCatalog, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            catalog,
            loader,
            slots: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Return the handle for `key`, loading it on first use.
    pub async fn resolve(&self, key: &str) -> Result<ModelHandle> {
        let spec = self.catalog.get(key).ok_or_else(|| TtsError::UnknownVariant {
            key: key.to_string(),
            available: self.catalog.keys(),
        })?;

        // Clone the slot out so no map guard is held across the await below.
        let slot: Slot = match self.slots.get(key) {
            Some(slot) => {
                if let Some(handle) = slot.get() {
                    return Ok(handle.clone());
                }
                slot.clone()
            }
            None => self.slots.entry(key.to_string()).or_default().clone(),
        };

        let handle = slot
            .get_or_try_init(|| async {
                info!(variant = %key, path = %spec.path, "Loading model");
                let started = Instant::now();
                let handle = self.loader.load(spec).await.map_err(|e| {
                    warn!(variant = %key, "Model load failed: {e:#}");
                    TtsError::Model(format!("failed to load {key}: {e:#}"))
                })?;
                info!(
                    variant = %key,
                    elapsed_s = started.elapsed().as_secs_f64(),
                    "Model loaded"
                );
                Ok::<_, TtsError>(handle)
            })
            .await?;
        Ok(handle.clone())
    }

    /// Load every key, stopping at the first failure.
    pub async fn preload(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.resolve(key).await?;
        }
        Ok(())
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    /// Sorted keys of the variants loaded so far.
    pub fn list_loaded(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn list_available(&self) -> Vec<String> {
        self.catalog.keys()
    }
}
