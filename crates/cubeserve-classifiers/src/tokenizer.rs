//! Query tokenization for local embedders

use cubeserve_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Tokenization scheme bound to a local embedder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerMode {
    /// Lowercased word tokens, punctuation dropped
    #[default]
    Token,
    /// Whitespace-separated chunks, kept verbatim
    Raw,
}

impl TokenizerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for TokenizerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenizerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "raw" => Ok(Self::Raw),
            other => Err(Error::config(format!("unknown tokenizer mode '{}'", other))),
        }
    }
}

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").expect("word pattern is valid"))
}

/// Splits queries into tokens according to its mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer {
    mode: TokenizerMode,
}

impl Tokenizer {
    pub fn new(mode: TokenizerMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TokenizerMode {
        self.mode
    }

    /// Tokenize a single query
    pub fn tokenize(&self, query: &str) -> Vec<String> {
        match self.mode {
            TokenizerMode::Token => word_regex()
                .find_iter(query)
                .map(|m| m.as_str().to_lowercase())
                .collect(),
            TokenizerMode::Raw => query.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Tokenize a batch of queries, preserving order
    pub fn tokenize_batch(&self, queries: &[String]) -> Vec<Vec<String>> {
        queries.iter().map(|q| self.tokenize(q)).collect()
    }
}
