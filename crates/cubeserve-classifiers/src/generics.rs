//! Scripted generic intents ("yes", "no", "repeat", ...)
//!
//! Generic labels are matched by whole-query comparison against canned
//! utterances after normalization, not by a trained model.

use cubeserve_core::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

fn non_alphanumeric() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("pattern is valid"))
}

/// Normalize an utterance for matching.
///
/// Lowercases, folds `ё` into `е`, replaces punctuation with spaces,
/// collapses whitespace and squeezes runs of one repeated character,
/// so that `"НЕЕТ!"` and `"нет"` compare equal.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace('ё', "е");
    let spaced = non_alphanumeric().replace_all(&lowered, " ");

    let mut out = String::with_capacity(spaced.len());
    let mut prev = None;
    for ch in spaced.trim().chars() {
        if Some(ch) != prev {
            out.push(ch);
        }
        prev = Some(ch);
    }
    out
}

/// Named groups of canned utterances
#[derive(Debug, Clone)]
pub struct GenericVocabulary {
    entries: BTreeMap<String, Vec<String>>,
}

impl Default for GenericVocabulary {
    fn default() -> Self {
        let builtin: [(&str, &[&str]); 3] = [
            (
                "yes",
                &[
                    "yes", "yeah", "yep", "sure", "ok", "okay", "да", "ага", "угу", "конечно",
                    "хорошо",
                ],
            ),
            ("no", &["no", "nope", "nah", "нет", "неа", "не", "не надо"]),
            (
                "repeat",
                &[
                    "repeat",
                    "again",
                    "say again",
                    "pardon",
                    "повтори",
                    "повторите",
                    "еще раз",
                    "что",
                ],
            ),
        ];

        Self {
            entries: builtin
                .iter()
                .map(|(name, utterances)| {
                    (name.to_string(), utterances.iter().map(|u| u.to_string()).collect())
                })
                .collect(),
        }
    }
}

impl GenericVocabulary {
    /// Empty vocabulary; every generic name is matched literally
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Built-in vocabulary overridden by a JSON file of `{"name": ["utterance", ...]}`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read generic data {}: {}", path.display(), e))
        })?;
        let overrides: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("invalid generic data {}: {}", path.display(), e)))?;

        let mut vocabulary = Self::default();
        info!(path = %path.display(), generics = overrides.len(), "Loaded generic vocabulary");
        vocabulary.entries.extend(overrides);
        Ok(vocabulary)
    }

    /// Add or replace a named group
    pub fn insert(&mut self, name: impl Into<String>, utterances: Vec<String>) {
        self.entries.insert(name.into(), utterances);
    }

    /// Utterances for a generic name; unknown names stand for themselves
    pub fn resolve(&self, name: &str) -> Vec<String> {
        self.entries
            .get(name)
            .cloned()
            .unwrap_or_else(|| vec![name.to_string()])
    }
}

/// Maps normalized utterances to generic labels
#[derive(Debug, Clone, Default)]
pub struct GenericMatcher {
    labels: Vec<String>,
    utterances: HashMap<String, Vec<usize>>,
}

impl GenericMatcher {
    /// Build from `(label, utterances)` pairs, in label order
    pub fn new(entries: &[(String, Vec<String>)]) -> Self {
        let mut matcher = Self::default();
        for (label, utterances) in entries {
            let index = matcher.labels.len();
            matcher.labels.push(label.clone());
            for utterance in utterances {
                let key = normalize(utterance);
                if key.is_empty() {
                    continue;
                }
                let slot = matcher.utterances.entry(key).or_default();
                if !slot.contains(&index) {
                    slot.push(index);
                }
            }
        }
        matcher
    }

    /// Generic labels in configuration order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Labels whose utterances match `query`, in configuration order
    pub fn matches(&self, query: &str) -> Vec<&str> {
        let mut hits: Vec<usize> = self
            .utterances
            .get(&normalize(query))
            .cloned()
            .unwrap_or_default();
        hits.sort_unstable();
        hits.into_iter().map(|i| self.labels[i].as_str()).collect()
    }
}
