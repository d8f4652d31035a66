//! Two-stage (group, then label) intent classification

use crate::classifier::{Classifier, EmbedderSpec, IntentClassifier};
use crate::embedder::Embedder;
use cubeserve_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// One training phrase with its coarse group and fine label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedExample {
    pub group: String,
    pub label: String,
    pub phrase: String,
}

/// A major classifier over groups and one minor classifier per group.
///
/// Every group the major classifier can produce has a minor classifier;
/// this is checked on construction.
#[derive(Debug, Clone)]
pub struct MultistageClassifier {
    major: IntentClassifier,
    minors: BTreeMap<String, IntentClassifier>,
}

impl MultistageClassifier {
    /// Compose trained stages
    pub fn new(
        major: IntentClassifier,
        minors: BTreeMap<String, IntentClassifier>,
    ) -> Result<Self> {
        let missing: Vec<&str> = major
            .labels()
            .iter()
            .filter(|group| !minors.contains_key(group.as_str()))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(Error::config(format!(
                "no minor model for groups: {}",
                missing.join(", ")
            )));
        }

        Ok(Self { major, minors })
    }

    /// Train the major stage on groups and each minor stage on its group's examples
    pub async fn train(
        embedder: Arc<dyn Embedder>,
        spec: EmbedderSpec,
        examples: &[GroupedExample],
    ) -> Result<Self> {
        if examples.is_empty() {
            return Err(Error::config("no training examples"));
        }

        let phrases: Vec<String> = examples.iter().map(|e| e.phrase.clone()).collect();
        let groups: Vec<String> = examples.iter().map(|e| e.group.clone()).collect();
        let major =
            IntentClassifier::train(embedder.clone(), spec.clone(), &phrases, &groups).await?;

        let mut by_group: BTreeMap<&str, (Vec<String>, Vec<String>)> = BTreeMap::new();
        for example in examples {
            let (phrases, labels) = by_group.entry(example.group.as_str()).or_default();
            phrases.push(example.phrase.clone());
            labels.push(example.label.clone());
        }

        let mut minors = BTreeMap::new();
        for (group, (phrases, labels)) in by_group {
            let minor =
                IntentClassifier::train(embedder.clone(), spec.clone(), &phrases, &labels)
                    .await?;
            minors.insert(group.to_string(), minor);
        }

        info!(groups = minors.len(), examples = examples.len(), "Trained multistage classifier");
        Self::new(major, minors)
    }

    pub fn major(&self) -> &IntentClassifier {
        &self.major
    }

    pub fn minors(&self) -> &BTreeMap<String, IntentClassifier> {
        &self.minors
    }

    /// Top fine label for each query.
    ///
    /// Only the label is returned; there is no probability for the
    /// composed decision.
    pub async fn predict(&self, queries: &[String]) -> Result<Vec<String>> {
        let groups = self.major.predict_top(queries).await?;

        let mut answers = Vec::with_capacity(queries.len());
        for (query, group) in queries.iter().zip(groups) {
            let minor = self.minors.get(&group).ok_or_else(|| {
                Error::internal(format!("no minor model for group '{}'", group))
            })?;
            let label = minor
                .predict_top(std::slice::from_ref(query))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    Error::internal(format!("minor model '{}' returned no label", group))
                })?;
            answers.push(label);
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::{strings, test_embedder};
    use crate::classifier::LinearParams;
    use crate::tokenizer::TokenizerMode;

    fn spec() -> EmbedderSpec {
        EmbedderSpec::new("test", TokenizerMode::Token)
    }

    fn example(group: &str, label: &str, phrase: &str) -> GroupedExample {
        GroupedExample {
            group: group.into(),
            label: label.into(),
            phrase: phrase.into(),
        }
    }

    /// A classifier whose only label is `label`
    fn constant(label: &str) -> IntentClassifier {
        let params = LinearParams {
            labels: strings(&[label]),
            weights: vec![vec![0.0; 4]],
            bias: vec![0.0],
        };
        IntentClassifier::new(test_embedder(), spec(), params).unwrap()
    }

    #[tokio::test]
    async fn test_major_group_selects_minor_label() {
        let mut minors = BTreeMap::new();
        minors.insert("A".to_string(), constant("X"));

        let classifier = MultistageClassifier::new(constant("A"), minors).unwrap();
        assert_eq!(classifier.predict(&strings(&["q"])).await.unwrap(), vec!["X"]);
    }

    #[test]
    fn test_missing_minor_is_config_error() {
        let mut minors = BTreeMap::new();
        minors.insert("B".to_string(), constant("X"));

        let err = MultistageClassifier::new(constant("A"), minors).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("A")));
    }

    #[tokio::test]
    async fn test_train_and_predict() {
        let examples = vec![
            example("smalltalk", "greeting", "hello"),
            example("smalltalk", "greeting", "hi"),
            example("smalltalk", "forecast", "weather"),
            example("smalltalk", "forecast", "rain"),
            example("shop", "pricing", "price"),
            example("shop", "pricing", "cost"),
            example("shop", "opening", "schedule"),
            example("shop", "opening", "hours"),
        ];

        let classifier = MultistageClassifier::train(test_embedder(), spec(), &examples)
            .await
            .unwrap();
        assert_eq!(classifier.minors().len(), 2);
        assert_eq!(
            classifier.minors()["shop"].labels(),
            strings(&["pricing", "opening"]).as_slice()
        );

        let answers = classifier
            .predict(&strings(&["hello", "what is the cost", "opening hours"]))
            .await
            .unwrap();
        assert_eq!(answers, vec!["greeting", "pricing", "opening"]);
    }
}
