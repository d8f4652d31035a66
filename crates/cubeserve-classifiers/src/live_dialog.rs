//! Live dialog classifier
//!
//! Combines a phrase classifier trained on `intent_phrases` labels with
//! scripted `generics` labels, and always offers a not-understand fallback.
//!
//! Ranking for one query:
//! 1. generic labels whose utterances match the query, at probability 1.0
//! 2. phrase-classifier labels with their probabilities
//! 3. unmatched generic labels at 0.0
//! 4. the fallback label at 0.0
//!
//! The ranking is then restricted to `allowed_labels` (the fallback always
//! survives), and when no other label reaches [`CONFIDENCE_THRESHOLD`] the
//! fallback is moved to the front.

use crate::classifier::{Classifier, EmbedderSpec, IntentClassifier, LinearParams};
use crate::embedder::{Embedder, EmbedderFactory};
use crate::generics::{GenericMatcher, GenericVocabulary};
use cubeserve_core::{Error, LabelScore, Ranking, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Minimum probability for a label to count as understood
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

/// One configured label: trained from phrases or matched as a generic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSetting {
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_phrases: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generics: Option<Vec<String>>,
}

impl LabelSetting {
    pub fn phrases(label: impl Into<String>, phrases: &[&str]) -> Self {
        Self {
            label: label.into(),
            intent_phrases: Some(phrases.iter().map(|s| s.to_string()).collect()),
            generics: None,
        }
    }

    pub fn generic(label: impl Into<String>, generics: &[&str]) -> Self {
        Self {
            label: label.into(),
            intent_phrases: None,
            generics: Some(generics.iter().map(|s| s.to_string()).collect()),
        }
    }
}

/// Label configuration submitted for training
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDialogConfig {
    #[serde(default)]
    pub labels_settings: Vec<LabelSetting>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_understand_label: Option<String>,

    /// Language key resolved by the serving layer into embedder/tokenizer modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedder_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_mode: Option<String>,
}

impl LiveDialogConfig {
    /// Check the configuration and return the fallback label
    pub fn validate(&self) -> Result<&str> {
        let fallback = self
            .not_understand_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::config("`not_understand_label` is required"))?;

        if self.labels_settings.is_empty() {
            return Err(Error::config("`labels_settings` must not be empty"));
        }

        let mut seen = HashSet::new();
        for setting in &self.labels_settings {
            let label = setting.label.trim();
            if label.is_empty() {
                return Err(Error::config("label names must not be empty"));
            }
            if !seen.insert(label) {
                return Err(Error::config(format!("duplicate label '{}'", label)));
            }

            match (&setting.intent_phrases, &setting.generics) {
                (Some(phrases), None) if !phrases.is_empty() => {}
                (None, Some(generics)) if !generics.is_empty() => {}
                (Some(_), Some(_)) => {
                    return Err(Error::config(format!(
                        "label '{}' has both `intent_phrases` and `generics`",
                        label
                    )));
                }
                _ => {
                    return Err(Error::config(format!(
                        "label '{}' needs non-empty `intent_phrases` or `generics`",
                        label
                    )));
                }
            }
        }

        Ok(fallback)
    }
}

/// Persisted live dialog parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDialogRecord {
    pub embedder: EmbedderSpec,
    pub config: LiveDialogConfig,

    /// Resolved utterances per generic label, in configuration order
    pub generics: Vec<(String, Vec<String>)>,

    /// Phrase classifier; absent when no label has intent phrases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase_classifier: Option<LinearParams>,
}

/// Multi-intent dialog classifier with a mandatory fallback label
#[derive(Debug, Clone)]
pub struct LiveDialogClassifier {
    spec: EmbedderSpec,
    config: LiveDialogConfig,
    generic_entries: Vec<(String, Vec<String>)>,
    phrase_classifier: Option<IntentClassifier>,
    matcher: GenericMatcher,
    not_understand_label: String,
    labels: Vec<String>,
}

impl LiveDialogClassifier {
    /// Train from a label configuration
    pub async fn train(
        embedder: Arc<dyn Embedder>,
        spec: EmbedderSpec,
        config: LiveDialogConfig,
        vocabulary: &GenericVocabulary,
    ) -> Result<Self> {
        config.validate()?;

        let mut phrases = Vec::new();
        let mut targets = Vec::new();
        let mut generic_entries = Vec::new();

        for setting in &config.labels_settings {
            let label = setting.label.trim().to_string();
            if let Some(intent_phrases) = &setting.intent_phrases {
                for phrase in intent_phrases {
                    phrases.push(phrase.clone());
                    targets.push(label.clone());
                }
            } else if let Some(generics) = &setting.generics {
                let utterances = generics.iter().flat_map(|g| vocabulary.resolve(g)).collect();
                generic_entries.push((label, utterances));
            }
        }

        let phrase_classifier = if phrases.is_empty() {
            None
        } else {
            Some(IntentClassifier::train(embedder, spec.clone(), &phrases, &targets).await?)
        };

        let classifier = Self::assemble(spec, config, generic_entries, phrase_classifier)?;
        info!(
            labels = classifier.labels.len(),
            generics = classifier.generic_entries.len(),
            fallback = %classifier.not_understand_label,
            "Trained live dialog classifier"
        );
        Ok(classifier)
    }

    /// Rebuild from a persisted record
    pub async fn from_record(record: LiveDialogRecord, factory: &EmbedderFactory) -> Result<Self> {
        let phrase_classifier = match record.phrase_classifier {
            Some(params) => {
                let embedder = record.embedder.build(factory).await?;
                Some(IntentClassifier::new(embedder, record.embedder.clone(), params)?)
            }
            None => None,
        };

        Self::assemble(record.embedder, record.config, record.generics, phrase_classifier)
    }

    fn assemble(
        spec: EmbedderSpec,
        config: LiveDialogConfig,
        generic_entries: Vec<(String, Vec<String>)>,
        phrase_classifier: Option<IntentClassifier>,
    ) -> Result<Self> {
        let not_understand_label = config.validate()?.to_string();
        let labels = config
            .labels_settings
            .iter()
            .map(|s| s.label.trim().to_string())
            .collect();
        let matcher = GenericMatcher::new(&generic_entries);

        Ok(Self {
            spec,
            config,
            generic_entries,
            phrase_classifier,
            matcher,
            not_understand_label,
            labels,
        })
    }

    /// Persistable representation
    pub fn to_record(&self) -> LiveDialogRecord {
        LiveDialogRecord {
            embedder: self.spec.clone(),
            config: self.config.clone(),
            generics: self.generic_entries.clone(),
            phrase_classifier: self.phrase_classifier.as_ref().map(|c| c.params().clone()),
        }
    }

    pub fn not_understand_label(&self) -> &str {
        &self.not_understand_label
    }

    pub fn config(&self) -> &LiveDialogConfig {
        &self.config
    }

    /// Rank configured labels for each query, optionally restricted to `allowed_labels`
    pub async fn predict_with_labels(
        &self,
        queries: &[String],
        allowed_labels: Option<&[String]>,
    ) -> Result<Vec<Ranking>> {
        let base = match &self.phrase_classifier {
            Some(classifier) => classifier.predict(queries).await?,
            None => vec![Vec::new(); queries.len()],
        };

        let allowed: Option<HashSet<&str>> =
            allowed_labels.map(|labels| labels.iter().map(String::as_str).collect());

        Ok(queries
            .iter()
            .zip(base)
            .map(|(query, base)| self.rank_query(query, base, allowed.as_ref()))
            .collect())
    }

    fn rank_query(&self, query: &str, base: Ranking, allowed: Option<&HashSet<&str>>) -> Ranking {
        let matched = self.matcher.matches(query);

        let mut ranking: Ranking = matched
            .iter()
            .map(|label| LabelScore::new(*label, 1.0))
            .collect();
        ranking.extend(base.into_iter().filter(|s| !matched.contains(&s.label.as_str())));
        ranking.extend(
            self.matcher
                .labels()
                .iter()
                .filter(|label| !matched.contains(&label.as_str()))
                .map(|label| LabelScore::new(label.clone(), 0.0)),
        );

        let fallback = self.not_understand_label.as_str();
        if let Some(allowed) = allowed {
            ranking.retain(|s| {
                s.label == fallback || allowed.contains(s.label.as_str())
            });
        }

        // The fallback may itself be a trained phrase label
        let trained = ranking.iter().position(|s| s.label == fallback);
        let best = ranking.first().and_then(|s| s.probability).unwrap_or(0.0);
        if best < CONFIDENCE_THRESHOLD {
            debug!(query = %query, best, "No label reached threshold, falling back");
            if let Some(index) = trained {
                ranking.remove(index);
            }
            ranking.insert(0, LabelScore::new(fallback, 1.0 - best));
        } else if trained.is_none() {
            ranking.push(LabelScore::new(fallback, 0.0));
        }
        ranking
    }
}

#[async_trait::async_trait]
impl Classifier for LiveDialogClassifier {
    async fn predict(&self, queries: &[String]) -> Result<Vec<Ranking>> {
        self.predict_with_labels(queries, None).await
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::{strings, test_embedder};
    use crate::tokenizer::TokenizerMode;

    fn config() -> LiveDialogConfig {
        LiveDialogConfig {
            labels_settings: vec![
                LabelSetting::phrases("hello", &["hello", "hi"]),
                LabelSetting::phrases("price", &["price", "cost"]),
                LabelSetting::phrases("weather", &["weather", "rain"]),
                LabelSetting::generic("yes", &["yes"]),
                LabelSetting::generic("no", &["no"]),
                LabelSetting::generic("repeat", &["repeat"]),
            ],
            not_understand_label: Some("not_understand".to_string()),
            ..Default::default()
        }
    }

    async fn trained() -> LiveDialogClassifier {
        LiveDialogClassifier::train(
            test_embedder(),
            EmbedderSpec::new("test", TokenizerMode::Token),
            config(),
            &GenericVocabulary::default(),
        )
        .await
        .unwrap()
    }

    fn labels(ranking: &Ranking) -> Vec<&str> {
        ranking.iter().map(|s| s.label.as_str()).collect()
    }

    #[tokio::test]
    async fn test_phrase_label_on_top_with_every_label_present() {
        let model = trained().await;
        let rankings = model.predict(&strings(&["hello"])).await.unwrap();
        let ranking = &rankings[0];

        assert_eq!(ranking[0].label, "hello");
        assert!(ranking[0].exceeds_threshold(CONFIDENCE_THRESHOLD));
        assert_eq!(ranking.len(), 7);
        assert_eq!(ranking.last().unwrap().label, "not_understand");
    }

    #[tokio::test]
    async fn test_generic_utterance_wins() {
        let model = trained().await;
        let rankings = model.predict(&strings(&["yes", "НЕЕТ!"])).await.unwrap();

        assert_eq!(rankings[0][0], LabelScore::new("yes", 1.0));
        assert_eq!(rankings[1][0], LabelScore::new("no", 1.0));
        assert!(labels(&rankings[1]).contains(&"not_understand"));
    }

    #[tokio::test]
    async fn test_allowed_labels_exclude_match() {
        let model = trained().await;
        let allowed = strings(&["no"]);
        let rankings = model
            .predict_with_labels(&strings(&["yes"]), Some(&allowed))
            .await
            .unwrap();

        let ranking = &rankings[0];
        assert_eq!(ranking[0].label, "not_understand");
        assert!(ranking
            .iter()
            .all(|s| s.label == "no" || s.label == "not_understand"));
    }

    #[tokio::test]
    async fn test_unknown_allowed_labels_leave_only_fallback() {
        let model = trained().await;
        let allowed = strings(&["1", "2", "3"]);
        let rankings = model
            .predict_with_labels(&strings(&["weather"]), Some(&allowed))
            .await
            .unwrap();

        assert_eq!(labels(&rankings[0]), vec!["not_understand"]);
        assert_eq!(rankings[0][0].probability, Some(1.0));
    }

    #[tokio::test]
    async fn test_empty_query_falls_back() {
        let model = trained().await;
        let allowed = strings(&["yes", "no"]);
        let rankings = model
            .predict_with_labels(&strings(&[""]), Some(&allowed))
            .await
            .unwrap();

        assert_eq!(labels(&rankings[0]), vec!["not_understand", "yes", "no"]);

        let allowed = strings(&["no", "yes"]);
        let rankings = model
            .predict_with_labels(&strings(&["НЕЕТ!"]), Some(&allowed))
            .await
            .unwrap();
        assert_eq!(labels(&rankings[0]), vec!["no", "yes", "not_understand"]);
    }

    #[tokio::test]
    async fn test_fallback_label_with_phrases() {
        let config = LiveDialogConfig {
            labels_settings: vec![
                LabelSetting::phrases("hello", &["hello", "hi"]),
                LabelSetting::phrases("not_understand", &["price", "cost"]),
                LabelSetting::generic("yes", &["yes"]),
            ],
            not_understand_label: Some("not_understand".to_string()),
            ..Default::default()
        };
        let model = LiveDialogClassifier::train(
            test_embedder(),
            EmbedderSpec::new("test", TokenizerMode::Token),
            config,
            &GenericVocabulary::default(),
        )
        .await
        .unwrap();

        let queries = strings(&["price", "hello", "yes"]);
        let rankings = model.predict(&queries).await.unwrap();
        for ranking in &rankings {
            let fallbacks = ranking.iter().filter(|s| s.label == "not_understand").count();
            assert_eq!(fallbacks, 1);
            assert_eq!(ranking.len(), 3);
        }
        assert_eq!(rankings[0][0].label, "not_understand");
        assert_eq!(rankings[1][0].label, "hello");
        assert_eq!(rankings[2][0], LabelScore::new("yes", 1.0));

        let allowed = strings(&["hello"]);
        let rankings = model
            .predict_with_labels(&strings(&["cost"]), Some(&allowed))
            .await
            .unwrap();
        assert_eq!(labels(&rankings[0]), vec!["not_understand", "hello"]);
    }

    #[tokio::test]
    async fn test_generics_only_model() {
        let config = LiveDialogConfig {
            labels_settings: vec![LabelSetting::generic("agree", &["yes"])],
            not_understand_label: Some("nu".to_string()),
            ..Default::default()
        };
        let model = LiveDialogClassifier::train(
            test_embedder(),
            EmbedderSpec::new("test", TokenizerMode::Token),
            config,
            &GenericVocabulary::default(),
        )
        .await
        .unwrap();

        let rankings = model.predict(&strings(&["да", "maybe"])).await.unwrap();
        assert_eq!(labels(&rankings[0]), vec!["agree", "nu"]);
        assert_eq!(labels(&rankings[1]), vec!["nu", "agree"]);
        assert!(model.to_record().phrase_classifier.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut missing_fallback = config();
        missing_fallback.not_understand_label = None;
        assert!(matches!(missing_fallback.validate(), Err(Error::Config(_))));

        let no_labels = LiveDialogConfig {
            not_understand_label: Some("nu".into()),
            ..Default::default()
        };
        assert!(matches!(no_labels.validate(), Err(Error::Config(_))));

        let mut duplicate = config();
        duplicate.labels_settings.push(LabelSetting::generic("yes", &["ok"]));
        assert!(duplicate.validate().unwrap_err().to_string().contains("duplicate"));

        let mut both = config();
        both.labels_settings[0].generics = Some(vec!["yes".into()]);
        assert!(both.validate().is_err());

        let mut trained_fallback = config();
        trained_fallback
            .labels_settings
            .push(LabelSetting::phrases("not_understand", &["schedule"]));
        assert_eq!(trained_fallback.validate().unwrap(), "not_understand");

        assert_eq!(config().validate().unwrap(), "not_understand");
    }

    #[test]
    fn test_config_parses_service_payload() {
        let json = r#"{
            "labels_settings": [
                {"label": "hello", "intent_phrases": ["привет", "здравствуйте"]},
                {"label": "yes", "generics": ["yes"]}
            ],
            "not_understand_label": "not_understand",
            "lang": "ru"
        }"#;
        let config: LiveDialogConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.lang.as_deref(), Some("ru"));
        assert_eq!(config.validate().unwrap(), "not_understand");
    }
}
