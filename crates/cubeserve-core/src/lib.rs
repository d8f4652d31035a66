//! cubeserve core
//!
//! Core types and error handling shared across cubeserve components.
//!
//! This crate provides:
//! - The error taxonomy surfaced by model loading, embedding and training
//! - Label rankings and the deterministic ordering every classifier output follows
//! - Model identifiers and the vector type produced by embedders

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{sort_ranking, LabelScore, ModelId, Ranking, Vector};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{LabelScore, ModelId, Ranking, Vector};
}
