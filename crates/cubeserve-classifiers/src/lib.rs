//! cubeserve classifiers
//!
//! Model-serving machinery behind the cubeserve HTTP façade.
//!
//! Every model turns text into vectors through an [`Embedder`], either an
//! in-process lookup table or a remote embedder service, picked by an
//! [`EmbedderFactory`] from its root location. On top of that sit three
//! model families:
//! - [`IntentClassifier`]: single-stage label ranking
//! - [`MultistageClassifier`]: coarse group, then fine label within the group
//! - [`LiveDialogClassifier`]: phrase intents merged with scripted generic
//!   intents, always offering a not-understand fallback
//!
//! Trained models are persisted as `{id}.cube` documents and served through
//! the [`ModelRegistry`], which loads each ID at most once per process.

pub mod classifier;
pub mod embedder;
pub mod generics;
pub mod live_dialog;
pub mod model;
pub mod multistage;
pub mod registry;
pub mod storage;
pub mod tokenizer;

pub use classifier::{Classifier, EmbedderSpec, IntentClassifier, LinearParams};
pub use embedder::{
    Embedder, EmbedderFactory, FactoryType, LocalEmbedder, NetworkEmbedder, VectorTable,
};
pub use generics::{GenericMatcher, GenericVocabulary};
pub use live_dialog::{
    LabelSetting, LiveDialogClassifier, LiveDialogConfig, LiveDialogRecord, CONFIDENCE_THRESHOLD,
};
pub use model::{Model, ModelKind, ModelRecord};
pub use multistage::{GroupedExample, MultistageClassifier};
pub use registry::{ModelRegistry, RegistryStats};
pub use storage::ModelStorage;
pub use tokenizer::{Tokenizer, TokenizerMode};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{Classifier, IntentClassifier};
    pub use crate::embedder::{Embedder, EmbedderFactory};
    pub use crate::live_dialog::{LiveDialogClassifier, LiveDialogConfig};
    pub use crate::model::Model;
    pub use crate::multistage::MultistageClassifier;
    pub use crate::registry::ModelRegistry;
}
