//! In-process lookup-table embedder.
//!
//! The table is a word2vec-style text file: an optional `<count> <dim>`
//! header, then one `token v1 .. vdim` line per entry. Token vectors are
//! averaged; tokens missing from the table are skipped, and a sequence with
//! no known token encodes to the zero vector.

use super::{fill_empty_tokens, Embedder};
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;
use cubeserve_core::{Error, Result, Vector};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Immutable token -> vector table
#[derive(Debug, Clone)]
pub struct VectorTable {
    vectors: HashMap<String, Vector>,
    dim: usize,
}

impl VectorTable {
    /// Build a table from entries; every vector must share one dimensionality
    pub fn new(entries: impl IntoIterator<Item = (String, Vector)>) -> Result<Self> {
        let mut vectors = HashMap::new();
        let mut dim = None;

        for (token, vector) in entries {
            match dim {
                None => dim = Some(vector.len()),
                Some(d) if d != vector.len() => {
                    return Err(Error::config(format!(
                        "vector for '{}' has {} dimensions, expected {}",
                        token,
                        vector.len(),
                        d
                    )));
                }
                Some(_) => {}
            }
            vectors.insert(token, vector);
        }

        let dim = dim.ok_or_else(|| Error::config("vector table is empty"))?;
        if dim == 0 {
            return Err(Error::config("vector table has zero dimensions"));
        }

        Ok(Self { vectors, dim })
    }

    /// Parse the text table format
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut declared_dim = None;

        let mut seen_content = false;
        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }

            let mut parts = line.split(' ');
            let token = parts.next().unwrap_or_default().to_string();
            let values: Vec<&str> = parts.filter(|p| !p.is_empty()).collect();

            // "<count> <dim>" header on the first non-blank line
            let first = !seen_content;
            seen_content = true;
            if first && values.len() == 1 {
                if let (Ok(_), Ok(dim)) = (token.parse::<usize>(), values[0].parse::<usize>()) {
                    declared_dim = Some(dim);
                    continue;
                }
            }

            let vector = values
                .iter()
                .map(|v| v.parse::<f32>())
                .collect::<std::result::Result<Vector, _>>()
                .map_err(|e| Error::config(format!("line {}: invalid float: {}", line_no, e)))?;

            if let Some(dim) = declared_dim {
                if vector.len() != dim {
                    return Err(Error::config(format!(
                        "line {}: expected {} values, found {}",
                        line_no,
                        dim,
                        vector.len()
                    )));
                }
            }

            entries.push((token, vector));
        }

        Self::new(entries)
    }

    /// Load a table file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("failed to read vector table {}: {}", path.display(), e))
        })?;

        Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<&Vector> {
        self.vectors.get(token)
    }

    /// Mean of the known token vectors; zero vector if none are known
    pub fn mean(&self, tokens: &[String]) -> Vector {
        let mut sum = vec![0.0f32; self.dim];
        let mut known = 0usize;

        for vector in tokens.iter().filter_map(|t| self.vectors.get(t)) {
            for (acc, v) in sum.iter_mut().zip(vector) {
                *acc += v;
            }
            known += 1;
        }

        if known > 1 {
            let n = known as f32;
            sum.iter_mut().for_each(|v| *v /= n);
        }
        sum
    }
}

/// Lookup-table embedder with a bound tokenizer
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    mode: String,
    table: Arc<VectorTable>,
    tokenizer: Tokenizer,
}

impl LocalEmbedder {
    /// Create an embedder over an already-loaded table
    pub fn new(mode: impl Into<String>, table: Arc<VectorTable>, tokenizer: Tokenizer) -> Self {
        Self {
            mode: mode.into(),
            table,
            tokenizer,
        }
    }

    pub fn dim(&self) -> usize {
        self.table.dim()
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn encode_tokens(&self, mut batch: Vec<Vec<String>>) -> Result<Vec<Vector>> {
        fill_empty_tokens(&mut batch);
        Ok(batch.iter().map(|tokens| self.table.mean(tokens)).collect())
    }

    async fn encode_queries(&self, queries: &[String]) -> Result<Vec<Vector>> {
        self.encode_tokens(self.tokenizer.tokenize_batch(queries)).await
    }

    async fn tokenizer_mode(&self) -> Result<String> {
        Ok(self.tokenizer.mode().to_string())
    }

    fn embedder_mode(&self) -> &str {
        &self.mode
    }
}
