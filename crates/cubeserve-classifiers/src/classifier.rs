//! Classifier trait and the single-stage intent classifier

use crate::embedder::{Embedder, EmbedderFactory};
use crate::tokenizer::TokenizerMode;
use async_trait::async_trait;
use cubeserve_core::{sort_ranking, Error, LabelScore, Ranking, Result, Vector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Full-batch gradient descent epochs
const EPOCHS: usize = 400;

/// Gradient descent step size
const LEARNING_RATE: f32 = 1.0;

/// L2 penalty on the weights
const L2_PENALTY: f32 = 1e-4;

/// Trait for all label-ranking classifiers
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Rank every known label for each query, most probable first
    async fn predict(&self, queries: &[String]) -> Result<Vec<Ranking>>;

    /// Labels the classifier can produce, in training order
    fn labels(&self) -> &[String];
}

/// Embedder a model was trained with; the location comes from the factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderSpec {
    /// Embedding mode name
    pub mode: String,

    /// Tokenizer bound to local embedders
    #[serde(default)]
    pub tokenizer_mode: TokenizerMode,
}

impl EmbedderSpec {
    pub fn new(mode: impl Into<String>, tokenizer_mode: TokenizerMode) -> Self {
        Self {
            mode: mode.into(),
            tokenizer_mode,
        }
    }

    /// Rebuild the embedder through `factory`
    pub async fn build(&self, factory: &EmbedderFactory) -> Result<Arc<dyn Embedder>> {
        factory.create(&self.mode, Some(self.tokenizer_mode)).await
    }
}

/// Trained parameters of a multinomial logistic regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    /// Label vocabulary
    pub labels: Vec<String>,

    /// One weight row per label
    pub weights: Vec<Vector>,

    /// One bias per label
    pub bias: Vec<f32>,
}

impl LinearParams {
    /// Check that shapes agree
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(Error::config("classifier has no labels"));
        }
        if self.weights.len() != self.labels.len() || self.bias.len() != self.labels.len() {
            return Err(Error::config(format!(
                "classifier has {} labels but {} weight rows and {} biases",
                self.labels.len(),
                self.weights.len(),
                self.bias.len()
            )));
        }
        let dim = self.dim();
        if self.weights.iter().any(|row| row.len() != dim) {
            return Err(Error::config("classifier weight rows differ in length"));
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    /// Fit parameters on feature vectors and their labels
    pub fn fit(features: &[Vector], targets: &[String]) -> Result<Self> {
        if features.is_empty() {
            return Err(Error::config("no training examples"));
        }
        if features.len() != targets.len() {
            return Err(Error::config(format!(
                "{} phrases but {} labels",
                features.len(),
                targets.len()
            )));
        }

        let dim = features[0].len();
        if features.iter().any(|f| f.len() != dim) {
            return Err(Error::backend(
                "training",
                "embedder returned vectors of inconsistent dimensionality",
            ));
        }

        let mut labels: Vec<String> = Vec::new();
        let mut classes = Vec::with_capacity(targets.len());
        for target in targets {
            let index = match labels.iter().position(|l| l == target) {
                Some(index) => index,
                None => {
                    labels.push(target.clone());
                    labels.len() - 1
                }
            };
            classes.push(index);
        }

        let inputs: Vec<Vector> = features.iter().map(|f| normalize(f)).collect();
        let k = labels.len();
        let n = inputs.len() as f32;

        let mut weights = vec![vec![0.0f32; dim]; k];
        let mut bias = vec![0.0f32; k];

        for _ in 0..EPOCHS {
            let mut grad_w = vec![vec![0.0f32; dim]; k];
            let mut grad_b = vec![0.0f32; k];

            for (x, &class) in inputs.iter().zip(&classes) {
                let probs = softmax(&logits(&weights, &bias, x));
                for (c, p) in probs.iter().enumerate() {
                    let err = p - if c == class { 1.0 } else { 0.0 };
                    grad_b[c] += err;
                    for (g, xi) in grad_w[c].iter_mut().zip(x) {
                        *g += err * xi;
                    }
                }
            }

            for c in 0..k {
                bias[c] -= LEARNING_RATE * grad_b[c] / n;
                for (w, g) in weights[c].iter_mut().zip(&grad_w[c]) {
                    *w -= LEARNING_RATE * (g / n + L2_PENALTY * *w);
                }
            }
        }

        Ok(Self {
            labels,
            weights,
            bias,
        })
    }

    /// Probability of each label for one feature vector
    pub fn probabilities(&self, features: &[f32]) -> Vec<f32> {
        softmax(&logits(&self.weights, &self.bias, &normalize(features)))
    }

    /// Full ranking for one feature vector
    pub fn rank(&self, features: &[f32]) -> Ranking {
        let mut ranking: Ranking = self
            .labels
            .iter()
            .zip(self.probabilities(features))
            .map(|(label, p)| LabelScore::new(label.clone(), p))
            .collect();
        sort_ranking(&mut ranking);
        ranking
    }
}

fn normalize(v: &[f32]) -> Vector {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn logits(weights: &[Vector], bias: &[f32], x: &[f32]) -> Vec<f32> {
    weights
        .iter()
        .zip(bias)
        .map(|(row, b)| row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f32>() + b)
        .collect()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Single-stage intent classifier over query embeddings
#[derive(Clone)]
pub struct IntentClassifier {
    embedder: Arc<dyn Embedder>,
    spec: EmbedderSpec,
    params: LinearParams,
}

impl std::fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("spec", &self.spec)
            .field("labels", &self.params.labels)
            .finish()
    }
}

impl IntentClassifier {
    /// Wrap trained parameters
    pub fn new(
        embedder: Arc<dyn Embedder>,
        spec: EmbedderSpec,
        params: LinearParams,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            embedder,
            spec,
            params,
        })
    }

    /// Train on example phrases and their labels
    pub async fn train(
        embedder: Arc<dyn Embedder>,
        spec: EmbedderSpec,
        phrases: &[String],
        labels: &[String],
    ) -> Result<Self> {
        if phrases.len() != labels.len() {
            return Err(Error::config(format!(
                "{} phrases but {} labels",
                phrases.len(),
                labels.len()
            )));
        }
        if phrases.is_empty() {
            return Err(Error::config("no training phrases"));
        }

        let features = embedder.encode_queries(phrases).await?;
        let params = LinearParams::fit(&features, labels)?;

        info!(
            mode = %spec.mode,
            examples = phrases.len(),
            labels = params.labels.len(),
            "Trained intent classifier"
        );

        Self::new(embedder, spec, params)
    }

    pub fn spec(&self) -> &EmbedderSpec {
        &self.spec
    }

    pub fn params(&self) -> &LinearParams {
        &self.params
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Top label for each query
    pub async fn predict_top(&self, queries: &[String]) -> Result<Vec<String>> {
        Ok(self
            .predict(queries)
            .await?
            .into_iter()
            .filter_map(|ranking| ranking.into_iter().next().map(|s| s.label))
            .collect())
    }
}

#[async_trait]
impl Classifier for IntentClassifier {
    async fn predict(&self, queries: &[String]) -> Result<Vec<Ranking>> {
        let features = self.embedder.encode_queries(queries).await?;
        if features.len() != queries.len() {
            return Err(Error::backend(
                self.spec.mode.clone(),
                format!("expected {} vectors, received {}", queries.len(), features.len()),
            ));
        }

        let dim = self.params.dim();
        if let Some(bad) = features.iter().find(|f| f.len() != dim) {
            return Err(Error::backend(
                self.spec.mode.clone(),
                format!("embedder returned {} dimensions, classifier expects {}", bad.len(), dim),
            ));
        }

        debug!(mode = %self.spec.mode, queries = queries.len(), "Predicting intents");
        Ok(features.iter().map(|f| self.params.rank(f)).collect())
    }

    fn labels(&self) -> &[String] {
        &self.params.labels
    }
}
