//! Service configuration

use cubeserve_classifiers::{EmbedderSpec, TokenizerMode};
use cubeserve_core::{Error, ModelId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding `{id}.cube` model documents
    #[serde(default = "default_model_storage")]
    pub model_storage: PathBuf,

    /// Embedder root: a directory of `{mode}.kv` tables or an embedder service URL
    #[serde(default = "default_embedder_path")]
    pub embedder_path: String,

    /// Timeout for network embedder calls
    #[serde(default = "default_embedder_timeout")]
    pub embedder_timeout_secs: u64,

    /// JSON file extending the built-in generic utterances
    #[serde(default)]
    pub generic_data_path: Option<PathBuf>,

    /// Model IDs loaded at start-up
    #[serde(default)]
    pub preload: Vec<ModelId>,

    /// Model used by the multistage endpoint when a request names none
    #[serde(default)]
    pub multistage_model_id: Option<ModelId>,

    /// Embedder and tokenizer modes per language
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageConfig>,

    /// Local embedders exposed to remote clients
    #[serde(default)]
    pub embedder_service: EmbedderServiceConfig,

    /// Maximum accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ServiceConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };

        if let Some(storage) = &cli.model_storage {
            config.model_storage = storage.clone();
        }

        if let Some(embedder_path) = &cli.embedder_path {
            config.embedder_path = embedder_path.clone();
        }

        for id in &cli.models {
            if !config.preload.contains(id) {
                config.preload.push(*id);
            }
        }

        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn embedder_timeout(&self) -> Duration {
        Duration::from_secs(self.embedder_timeout_secs)
    }

    /// Embedder a training request for `lang` should use
    pub fn embedder_for(&self, lang: &str) -> Result<EmbedderSpec> {
        self.languages
            .get(lang)
            .map(|language| {
                EmbedderSpec::new(language.embedder_mode.clone(), language.tokenizer_mode)
            })
            .ok_or_else(|| Error::config(format!("unsupported language '{}'", lang)))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_storage: default_model_storage(),
            embedder_path: default_embedder_path(),
            embedder_timeout_secs: default_embedder_timeout(),
            generic_data_path: None,
            preload: Vec::new(),
            multistage_model_id: None,
            languages: BTreeMap::new(),
            embedder_service: EmbedderServiceConfig::default(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Modes used for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub embedder_mode: String,

    #[serde(default)]
    pub tokenizer_mode: TokenizerMode,
}

/// Embedder peer endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbedderServiceConfig {
    /// Local modes served under `/embedders/{mode}`
    #[serde(default)]
    pub modes: Vec<String>,
}

fn default_model_storage() -> PathBuf {
    PathBuf::from("./models")
}

fn default_embedder_path() -> String {
    "./embedders".to_string()
}

fn default_embedder_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}
