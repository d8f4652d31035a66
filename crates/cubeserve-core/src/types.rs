//! Core types for cubeserve

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identifier of a persisted model, unique within one storage directory
pub type ModelId = u64;

/// Dense embedding vector
pub type Vector = Vec<f32>;

/// A single label with its probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    /// Class label
    pub label: String,

    /// Probability in [0, 1]; `None` when the producer does not compute one
    pub probability: Option<f32>,
}

impl LabelScore {
    /// Create a scored label
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability: Some(probability),
        }
    }

    /// Create a label without a probability
    pub fn unscored(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            probability: None,
        }
    }

    /// Check if the probability reaches the threshold
    pub fn exceeds_threshold(&self, threshold: f32) -> bool {
        self.probability.is_some_and(|p| p >= threshold)
    }
}

/// Labels ordered from most to least probable
pub type Ranking = Vec<LabelScore>;

/// Sort a ranking by descending probability.
///
/// The sort is stable, so equal probabilities keep their incoming order.
/// Unscored entries go last.
pub fn sort_ranking(ranking: &mut Ranking) {
    ranking.sort_by(|a, b| match (a.probability, b.probability) {
        (Some(pa), Some(pb)) => pb.partial_cmp(&pa).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
