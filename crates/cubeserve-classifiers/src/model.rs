//! Model kinds and their persisted records
//!
//! A record is one JSON document whose `class` field names the model kind.
//! Each kind has exactly one loader; there is no open-ended lookup.

use crate::classifier::{EmbedderSpec, IntentClassifier, LinearParams};
use crate::embedder::EmbedderFactory;
use crate::live_dialog::{LiveDialogClassifier, LiveDialogRecord};
use crate::multistage::MultistageClassifier;
use cubeserve_core::{Error, ModelId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discriminator of a model record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    IntentClassifier,
    Multistage,
    LiveDialog,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentClassifier => "intent_classifier",
            Self::Multistage => "multistage",
            Self::LiveDialog => "live_dialog",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted intent classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassifierRecord {
    pub embedder: EmbedderSpec,

    #[serde(flatten)]
    pub params: LinearParams,
}

/// Persisted multistage classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultistageRecord {
    pub embedder: EmbedderSpec,
    pub major: LinearParams,
    pub minors: BTreeMap<String, LinearParams>,
}

/// Self-describing model document stored as `{id}.cube`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ModelRecord {
    IntentClassifier(IntentClassifierRecord),
    Multistage(MultistageRecord),
    LiveDialog(LiveDialogRecord),
}

impl ModelRecord {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::IntentClassifier(_) => ModelKind::IntentClassifier,
            Self::Multistage(_) => ModelKind::Multistage,
            Self::LiveDialog(_) => ModelKind::LiveDialog,
        }
    }

    pub fn embedder(&self) -> &EmbedderSpec {
        match self {
            Self::IntentClassifier(r) => &r.embedder,
            Self::Multistage(r) => &r.embedder,
            Self::LiveDialog(r) => &r.embedder,
        }
    }
}

/// A loaded, immutable model
#[derive(Debug, Clone)]
pub enum Model {
    IntentClassifier(IntentClassifier),
    Multistage(MultistageClassifier),
    LiveDialog(LiveDialogClassifier),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::IntentClassifier(_) => ModelKind::IntentClassifier,
            Self::Multistage(_) => ModelKind::Multistage,
            Self::LiveDialog(_) => ModelKind::LiveDialog,
        }
    }

    /// Savable representation
    pub fn to_record(&self) -> ModelRecord {
        match self {
            Self::IntentClassifier(classifier) => {
                ModelRecord::IntentClassifier(IntentClassifierRecord {
                    embedder: classifier.spec().clone(),
                    params: classifier.params().clone(),
                })
            }
            Self::Multistage(classifier) => ModelRecord::Multistage(MultistageRecord {
                embedder: classifier.major().spec().clone(),
                major: classifier.major().params().clone(),
                minors: classifier
                    .minors()
                    .iter()
                    .map(|(group, minor)| (group.clone(), minor.params().clone()))
                    .collect(),
            }),
            Self::LiveDialog(classifier) => ModelRecord::LiveDialog(classifier.to_record()),
        }
    }

    /// Rebuild a model, creating its embedder through `factory`
    pub async fn from_record(record: ModelRecord, factory: &EmbedderFactory) -> Result<Self> {
        match record {
            ModelRecord::IntentClassifier(record) => load_intent_classifier(record, factory).await,
            ModelRecord::Multistage(record) => load_multistage(record, factory).await,
            ModelRecord::LiveDialog(record) => load_live_dialog(record, factory).await,
        }
    }

    pub fn as_intent_classifier(&self, id: ModelId) -> Result<&IntentClassifier> {
        match self {
            Self::IntentClassifier(classifier) => Ok(classifier),
            other => Err(other.wrong_kind(id, ModelKind::IntentClassifier)),
        }
    }

    pub fn as_multistage(&self, id: ModelId) -> Result<&MultistageClassifier> {
        match self {
            Self::Multistage(classifier) => Ok(classifier),
            other => Err(other.wrong_kind(id, ModelKind::Multistage)),
        }
    }

    pub fn as_live_dialog(&self, id: ModelId) -> Result<&LiveDialogClassifier> {
        match self {
            Self::LiveDialog(classifier) => Ok(classifier),
            other => Err(other.wrong_kind(id, ModelKind::LiveDialog)),
        }
    }

    fn wrong_kind(&self, id: ModelId, expected: ModelKind) -> Error {
        Error::WrongModelKind {
            id,
            expected: expected.as_str(),
            found: self.kind().as_str(),
        }
    }
}

async fn load_intent_classifier(
    record: IntentClassifierRecord,
    factory: &EmbedderFactory,
) -> Result<Model> {
    let embedder = record.embedder.build(factory).await?;
    let classifier = IntentClassifier::new(embedder, record.embedder, record.params)?;
    Ok(Model::IntentClassifier(classifier))
}

async fn load_multistage(record: MultistageRecord, factory: &EmbedderFactory) -> Result<Model> {
    let embedder = record.embedder.build(factory).await?;
    let major = IntentClassifier::new(embedder.clone(), record.embedder.clone(), record.major)?;

    let mut minors = BTreeMap::new();
    for (group, params) in record.minors {
        let minor = IntentClassifier::new(embedder.clone(), record.embedder.clone(), params)?;
        minors.insert(group, minor);
    }

    Ok(Model::Multistage(MultistageClassifier::new(major, minors)?))
}

async fn load_live_dialog(record: LiveDialogRecord, factory: &EmbedderFactory) -> Result<Model> {
    Ok(Model::LiveDialog(
        LiveDialogClassifier::from_record(record, factory).await?,
    ))
}
