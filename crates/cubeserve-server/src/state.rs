//! Shared application state

use crate::config::ServiceConfig;
use anyhow::Context;
use cubeserve_classifiers::{
    Embedder, EmbedderFactory, EmbedderSpec, FactoryType, GenericVocabulary, ModelRegistry,
    TokenizerMode,
};
use cubeserve_core::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ServiceConfig>,

    /// Lazily loaded models keyed by ID
    pub registry: Arc<ModelRegistry>,

    /// Canned utterances for live-dialog generics
    pub vocabulary: Arc<GenericVocabulary>,

    /// Local embedders served to remote clients, keyed by mode
    pub embedders: Arc<HashMap<String, Arc<dyn Embedder>>>,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the registry, load served embedders and preload configured models
    pub async fn new(
        config: ServiceConfig,
        metrics_handle: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        let factory =
            EmbedderFactory::with_timeout(&config.embedder_path, config.embedder_timeout())
                .context("failed to create embedder factory")?;

        let vocabulary = match &config.generic_data_path {
            Some(path) => GenericVocabulary::from_file(path)?,
            None => GenericVocabulary::default(),
        };

        let mut embedders: HashMap<String, Arc<dyn Embedder>> = HashMap::new();
        if !config.embedder_service.modes.is_empty()
            && factory.factory_type() != FactoryType::Local
        {
            anyhow::bail!(
                "embedder_service needs a local embedder_path, got {}",
                config.embedder_path
            );
        }
        for mode in &config.embedder_service.modes {
            let embedder = factory
                .create(mode, Some(tokenizer_for(&config, mode)))
                .await
                .with_context(|| format!("failed to load served embedder '{}'", mode))?;
            embedders.insert(mode.clone(), embedder);
        }

        let registry = ModelRegistry::new(&config.model_storage, Arc::new(factory));
        registry
            .preload(&config.preload)
            .await
            .context("failed to preload models")?;

        info!(
            storage = %config.model_storage.display(),
            preloaded = config.preload.len(),
            served_embedders = embedders.len(),
            "Application state ready"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            vocabulary: Arc::new(vocabulary),
            embedders: Arc::new(embedders),
            metrics_handle,
        })
    }

    /// Create the embedder a new model will be trained with
    pub async fn embedder(&self, spec: &EmbedderSpec) -> Result<Arc<dyn Embedder>> {
        spec.build(self.registry.factory()).await
    }
}

/// Tokenizer of the first language using `mode`, or the default
fn tokenizer_for(config: &ServiceConfig, mode: &str) -> TokenizerMode {
    config
        .languages
        .values()
        .find(|language| language.embedder_mode == mode)
        .map(|language| language.tokenizer_mode)
        .unwrap_or_default()
}
