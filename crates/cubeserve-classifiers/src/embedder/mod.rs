//! Vector embedders
//!
//! Provides the [`Embedder`] trait with two interchangeable backends:
//! - [`LocalEmbedder`]: in-process lookup table loaded from a `{mode}.kv` file
//! - [`NetworkEmbedder`]: delegates every call to a remote embedder service
//!
//! Backends are created through an [`EmbedderFactory`], which decides once,
//! from the syntax of its root location, which variant it builds.

pub mod factory;
pub mod local;
pub mod network;

pub use factory::{EmbedderFactory, FactoryType};
pub use local::{LocalEmbedder, VectorTable};
pub use network::NetworkEmbedder;

use async_trait::async_trait;
use cubeserve_core::{Result, Vector};

/// Token substituted for an empty token sequence before encoding
pub const EMPTY_TOKEN: &str = "";

/// Uniform embedding capability set.
///
/// Implementations are read-only after construction and can be shared
/// across request handlers without locking. For a given mode the vector
/// dimensionality is constant across calls.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode each token sequence into one vector, aligned with the input batch
    async fn encode_tokens(&self, batch: Vec<Vec<String>>) -> Result<Vec<Vector>>;

    /// Encode whole queries, aligned with the input batch
    async fn encode_queries(&self, queries: &[String]) -> Result<Vec<Vector>>;

    /// Tokenization scheme the backend applies to raw queries
    async fn tokenizer_mode(&self) -> Result<String>;

    /// Name of the embedding mode
    fn embedder_mode(&self) -> &str;
}

/// Replace every empty token sequence with a single empty-string token.
pub fn fill_empty_tokens(batch: &mut [Vec<String>]) {
    for tokens in batch.iter_mut().filter(|tokens| tokens.is_empty()) {
        tokens.push(EMPTY_TOKEN.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_empty_tokens_mutates_batch() {
        let mut batch = vec![
            vec!["привет".to_string()],
            vec![],
            vec!["a".to_string(), "b".to_string()],
            vec![],
        ];
        fill_empty_tokens(&mut batch);

        assert_eq!(batch[0], vec!["привет"]);
        assert_eq!(batch[1], vec![EMPTY_TOKEN]);
        assert_eq!(batch[2], vec!["a", "b"]);
        assert_eq!(batch[3], vec![EMPTY_TOKEN]);
    }
}
