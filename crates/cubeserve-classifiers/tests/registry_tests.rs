//! Model registry integration tests
//!
//! Trains models of every family against a local embedder table, persists
//! them, and reloads them through fresh registries.

use cubeserve_classifiers::{
    Classifier, EmbedderFactory, EmbedderSpec, GenericVocabulary, GroupedExample,
    IntentClassifier, LabelSetting, LiveDialogClassifier, LiveDialogConfig, Model, ModelRegistry,
    MultistageClassifier, TokenizerMode,
};
use cubeserve_core::Error;
use std::sync::Arc;
use tempfile::TempDir;

const TABLE: &str = "\
hello 1.0 0.0 0.0
hi 1.0 0.0 0.0
price 0.0 1.0 0.0
cost 0.0 1.0 0.0
weather 0.0 0.0 1.0
rain 0.0 0.0 1.0
";

struct Fixture {
    embedders: TempDir,
    models: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let embedders = tempfile::tempdir().unwrap();
        std::fs::write(embedders.path().join("en.kv"), TABLE).unwrap();
        Self {
            embedders,
            models: tempfile::tempdir().unwrap(),
        }
    }

    fn registry(&self) -> ModelRegistry {
        let factory = EmbedderFactory::new(self.embedders.path().display().to_string()).unwrap();
        ModelRegistry::new(self.models.path(), Arc::new(factory))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn spec() -> EmbedderSpec {
    EmbedderSpec::new("en", TokenizerMode::Token)
}

async fn intent_model(registry: &ModelRegistry) -> Model {
    let embedder = spec().build(registry.factory()).await.unwrap();
    let classifier = IntentClassifier::train(
        embedder,
        spec(),
        &strings(&["hello", "hi", "price", "cost", "weather", "rain"]),
        &strings(&["greet", "greet", "money", "money", "sky", "sky"]),
    )
    .await
    .unwrap();
    Model::IntentClassifier(classifier)
}

#[tokio::test]
async fn test_allocation_follows_directory_contents() {
    let fixture = Fixture::new();
    let registry = fixture.registry();

    assert_eq!(registry.allocate_next_id().await.unwrap(), 0);

    let model = intent_model(&registry).await;
    for id in [1, 2, 0] {
        registry.persist(id, &model).await.unwrap();
    }
    assert_eq!(registry.allocate_next_id().await.unwrap(), 3);

    // A fresh registry over the same directory sees the same IDs
    assert_eq!(fixture.registry().allocate_next_id().await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_share_one_instance() {
    let fixture = Fixture::new();
    let id = {
        let registry = fixture.registry();
        let model = intent_model(&registry).await;
        registry.create(model).await.unwrap()
    };

    let registry = Arc::new(fixture.registry());
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_load(id).await.unwrap() })
        })
        .collect();

    let models = futures::future::join_all(tasks).await;
    let first = models[0].as_ref().unwrap();
    for model in &models {
        assert!(Arc::ptr_eq(first, model.as_ref().unwrap()));
    }
    assert_eq!(registry.stats().disk_loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_ids() {
    let fixture = Fixture::new();
    let registry = Arc::new(fixture.registry());

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let model = intent_model(&registry).await;
                registry.create(model).await.unwrap()
            })
        })
        .collect();

    let mut ids: Vec<u64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_multistage_survives_reload() {
    let fixture = Fixture::new();
    let registry = fixture.registry();
    let embedder = spec().build(registry.factory()).await.unwrap();

    let examples: Vec<GroupedExample> = [
        ("talk", "greet", "hello"),
        ("talk", "greet", "hi"),
        ("talk", "forecast", "weather"),
        ("talk", "forecast", "rain"),
        ("shop", "quote", "price"),
        ("shop", "quote", "cost"),
    ]
    .iter()
    .map(|(group, label, phrase)| GroupedExample {
        group: group.to_string(),
        label: label.to_string(),
        phrase: phrase.to_string(),
    })
    .collect();

    let classifier = MultistageClassifier::train(embedder, spec(), &examples).await.unwrap();
    let queries = strings(&["hello", "rain today", "what cost"]);
    let before = classifier.predict(&queries).await.unwrap();
    assert_eq!(before, strings(&["greet", "forecast", "quote"]));

    let id = registry.create(Model::Multistage(classifier)).await.unwrap();

    let fresh = fixture.registry();
    let model = fresh.get_or_load(id).await.unwrap();
    let after = model.as_multistage(id).unwrap().predict(&queries).await.unwrap();
    assert_eq!(before, after);

    assert!(matches!(
        model.as_live_dialog(id),
        Err(Error::WrongModelKind { .. })
    ));
}

#[tokio::test]
async fn test_live_dialog_survives_reload_without_vocabulary() {
    let fixture = Fixture::new();
    let registry = fixture.registry();
    let embedder = spec().build(registry.factory()).await.unwrap();

    let mut vocabulary = GenericVocabulary::empty();
    vocabulary.insert("yes", strings(&["sure", "of course"]));

    let config = LiveDialogConfig {
        labels_settings: vec![
            LabelSetting::phrases("hello", &["hello", "hi"]),
            LabelSetting::phrases("price", &["price", "cost"]),
            LabelSetting::generic("agree", &["yes"]),
        ],
        not_understand_label: Some("nu".into()),
        ..Default::default()
    };

    let classifier = LiveDialogClassifier::train(embedder, spec(), config, &vocabulary)
        .await
        .unwrap();
    let queries = strings(&["Of course!", "hi", ""]);
    let before = classifier.predict(&queries).await.unwrap();
    assert_eq!(before[0][0].label, "agree");

    let id = registry.create(Model::LiveDialog(classifier)).await.unwrap();

    let fresh = fixture.registry();
    let model = fresh.get_or_load(id).await.unwrap();
    let reloaded = model.as_live_dialog(id).unwrap();
    assert_eq!(reloaded.not_understand_label(), "nu");
    assert_eq!(reloaded.predict(&queries).await.unwrap(), before);
}

#[tokio::test]
async fn test_failed_load_can_be_retried() {
    let fixture = Fixture::new();
    let registry = fixture.registry();

    assert!(matches!(
        registry.get_or_load(0).await,
        Err(Error::ModelNotFound { id: 0, .. })
    ));

    let model = intent_model(&fixture.registry()).await;
    fixture.registry().persist(0, &model).await.unwrap();

    registry.get_or_load(0).await.unwrap();
    assert_eq!(registry.stats().disk_loads(), 1);
}
