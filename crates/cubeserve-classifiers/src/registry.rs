//! Lazy per-process model registry
//!
//! Maps model IDs to loaded, immutable [`Model`] instances. A model is read
//! from storage the first time it is asked for; concurrent requests for the
//! same unseen ID share a single load.

use crate::embedder::EmbedderFactory;
use crate::model::Model;
use crate::storage::ModelStorage;
use cubeserve_core::{Error, ModelId, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info};

type ModelCell = Arc<OnceCell<Arc<Model>>>;

/// Load counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    disk_loads: AtomicU64,
    cache_hits: AtomicU64,
}

impl RegistryStats {
    /// Number of models deserialized from storage
    pub fn disk_loads(&self) -> u64 {
        self.disk_loads.load(Ordering::Relaxed)
    }

    /// Number of lookups served from memory
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

/// ID-keyed cache of loaded models backed by a storage directory
pub struct ModelRegistry {
    storage: ModelStorage,
    factory: Arc<EmbedderFactory>,
    models: RwLock<HashMap<ModelId, ModelCell>>,
    allocation: Mutex<()>,
    stats: RegistryStats,
}

impl ModelRegistry {
    /// Create an empty registry over `storage_root`
    pub fn new(storage_root: impl Into<PathBuf>, factory: Arc<EmbedderFactory>) -> Self {
        Self {
            storage: ModelStorage::new(storage_root),
            factory,
            models: RwLock::new(HashMap::new()),
            allocation: Mutex::new(()),
            stats: RegistryStats::default(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        self.storage.root()
    }

    pub fn factory(&self) -> &Arc<EmbedderFactory> {
        &self.factory
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// IDs currently held in memory, ascending
    pub fn loaded_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self
            .models
            .read()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Return the cached model for `id`, loading it from storage on first use
    pub async fn get_or_load(&self, id: ModelId) -> Result<Arc<Model>> {
        let cell = self.cell(id);

        if let Some(model) = cell.get() {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(model));
        }

        match cell.get_or_try_init(|| self.load(id)).await {
            Ok(model) => Ok(Arc::clone(model)),
            Err(e) => {
                self.discard_empty(id, &cell);
                Err(e)
            }
        }
    }

    /// Insert a freshly trained model, replacing any cached instance
    pub fn register(&self, id: ModelId, model: Arc<Model>) {
        let cell = Arc::new(OnceCell::new_with(Some(model)));
        self.models.write().insert(id, cell);
        debug!(model_id = id, "Registered model");
    }

    /// `max(existing IDs) + 1`, or 0 for an empty storage directory
    pub async fn allocate_next_id(&self) -> Result<ModelId> {
        self.storage.next_id().await
    }

    /// Write the savable representation of `model` to `{storage_root}/{id}.cube`
    pub async fn persist(&self, id: ModelId, model: &Model) -> Result<()> {
        self.storage.write(id, &model.to_record()).await
    }

    /// Allocate an ID, persist `model` under it and cache it
    pub async fn create(&self, model: Model) -> Result<ModelId> {
        let _guard = self.allocation.lock().await;

        let id = self.allocate_next_id().await?;
        self.persist(id, &model).await?;

        let kind = model.kind();
        self.register(id, Arc::new(model));
        info!(model_id = id, kind = %kind, "Created model");
        Ok(id)
    }

    /// Load every ID in `ids`, stopping at the first failure
    pub async fn preload(&self, ids: &[ModelId]) -> Result<()> {
        for &id in ids {
            self.get_or_load(id).await?;
        }
        Ok(())
    }

    fn cell(&self, id: ModelId) -> ModelCell {
        if let Some(cell) = self.models.read().get(&id) {
            return Arc::clone(cell);
        }
        Arc::clone(self.models.write().entry(id).or_default())
    }

    fn discard_empty(&self, id: ModelId, cell: &ModelCell) {
        let mut models = self.models.write();
        if let Some(current) = models.get(&id) {
            if Arc::ptr_eq(current, cell) && !current.initialized() {
                models.remove(&id);
            }
        }
    }

    async fn load(&self, id: ModelId) -> Result<Arc<Model>> {
        let start = Instant::now();
        let record = self.storage.read(id).await?;
        let kind = record.kind();

        let model = Model::from_record(record, &self.factory)
            .await
            .map_err(|e| {
                error!(model_id = id, kind = %kind, error = %e, "Failed to rebuild model");
                Error::corrupt(id, e.to_string())
            })?;

        self.stats.disk_loads.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cubeserve_model_loads_total").increment(1);
        info!(
            model_id = id,
            kind = %kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded model from storage"
        );

        Ok(Arc::new(model))
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("storage_root", &self.storage.root())
            .field("loaded", &self.loaded_ids())
            .finish()
    }
}
