//! Embedder factory keyed by embedding mode

use super::{Embedder, LocalEmbedder, NetworkEmbedder, VectorTable};
use crate::tokenizer::{Tokenizer, TokenizerMode};
use cubeserve_core::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

use super::network::DEFAULT_TIMEOUT;

/// Which backend variant a factory builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryType {
    Local,
    Network,
}

/// Whether `location` is URL-shaped (`http://` or `https://`)
pub fn is_url(location: &str) -> bool {
    Url::parse(location)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// Builds embedders for a fixed root location.
///
/// The variant is chosen once at construction. A URL root yields network
/// embedders at `{root}/{mode}`; a directory root yields local embedders
/// reading `{root}/{mode}.kv`. Local tables are read once per mode and
/// shared by every embedder created afterwards, including clones of the
/// factory.
#[derive(Debug, Clone)]
pub struct EmbedderFactory {
    root: String,
    factory_type: FactoryType,
    client: Option<reqwest::Client>,
    tables: Arc<RwLock<HashMap<String, Arc<VectorTable>>>>,
}

impl EmbedderFactory {
    /// Create a factory with the default network timeout
    pub fn new(root: impl Into<String>) -> Result<Self> {
        Self::with_timeout(root, DEFAULT_TIMEOUT)
    }

    /// Create a factory whose network embedders use `timeout`
    pub fn with_timeout(root: impl Into<String>, timeout: Duration) -> Result<Self> {
        let root = root.into();

        let (factory_type, client) = if is_url(&root) {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;
            (FactoryType::Network, Some(client))
        } else {
            (FactoryType::Local, None)
        };

        info!(root = %root, factory_type = ?factory_type, "Created embedder factory");

        Ok(Self {
            root: root.trim_end_matches('/').to_string(),
            factory_type,
            client,
            tables: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn factory_type(&self) -> FactoryType {
        self.factory_type
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Full location a mode resolves to
    pub fn location(&self, mode: &str) -> String {
        match self.factory_type {
            FactoryType::Network => format!("{}/{}", self.root, mode),
            FactoryType::Local => self.local_path(mode).display().to_string(),
        }
    }

    fn local_path(&self, mode: &str) -> PathBuf {
        PathBuf::from(&self.root).join(format!("{}.kv", mode))
    }

    /// Number of local tables held in memory
    pub fn cached_tables(&self) -> usize {
        self.tables.read().len()
    }

    async fn table(&self, mode: &str) -> Result<Arc<VectorTable>> {
        if let Some(table) = self.tables.read().get(mode) {
            return Ok(Arc::clone(table));
        }

        let path = self.local_path(mode);
        let table = Arc::new(VectorTable::load(&path).await?);
        info!(
            mode = %mode,
            path = %path.display(),
            tokens = table.len(),
            dim = table.dim(),
            "Loaded vector table"
        );

        // Concurrent first loads of one mode keep whichever table landed first
        let mut tables = self.tables.write();
        Ok(Arc::clone(tables.entry(mode.to_string()).or_insert(table)))
    }

    /// Create an embedder for `mode`.
    ///
    /// `tokenizer_mode` only applies to local embedders; remote peers own
    /// their tokenization.
    pub async fn create(
        &self,
        mode: &str,
        tokenizer_mode: Option<TokenizerMode>,
    ) -> Result<Arc<dyn Embedder>> {
        if mode.is_empty() || mode.contains(['/', '\\']) || mode.contains("..") {
            return Err(Error::config(format!("invalid embedder mode '{}'", mode)));
        }

        match (&self.factory_type, &self.client) {
            (FactoryType::Network, Some(client)) => Ok(Arc::new(NetworkEmbedder::with_client(
                self.location(mode),
                Some(mode.to_string()),
                client.clone(),
            ))),
            _ => {
                let table = self.table(mode).await?;
                let tokenizer = Tokenizer::new(tokenizer_mode.unwrap_or_default());
                Ok(Arc::new(LocalEmbedder::new(mode, table, tokenizer)))
            }
        }
    }
}
