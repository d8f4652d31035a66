//! On-disk model storage: one `{id}.cube` JSON document per model

use crate::model::ModelRecord;
use cubeserve_core::{Error, ModelId, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of persisted model documents
pub const MODEL_EXTENSION: &str = "cube";

/// Directory of persisted models
#[derive(Debug, Clone)]
pub struct ModelStorage {
    root: PathBuf,
}

impl ModelStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `id`
    pub fn path_for(&self, id: ModelId) -> PathBuf {
        self.root.join(format!("{}.{}", id, MODEL_EXTENSION))
    }

    /// Read and parse the document for `id`
    pub async fn read(&self, id: ModelId) -> Result<ModelRecord> {
        let path = self.path_for(id);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ModelNotFound { id, path });
            }
            Err(e) => {
                return Err(Error::corrupt(id, format!("failed to read {}: {}", path.display(), e)));
            }
        };

        debug!(model_id = id, path = %path.display(), bytes = content.len(), "Read model document");
        serde_json::from_slice(&content).map_err(|e| {
            Error::corrupt(id, format!("invalid model document {}: {}", path.display(), e))
        })
    }

    /// Write the document for `id` atomically (temp file, then rename)
    pub async fn write(&self, id: ModelId, record: &ModelRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.path_for(id);
        let tmp = self.root.join(format!("{}.{}.tmp", id, MODEL_EXTENSION));
        let body = serde_json::to_vec(record)?;

        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(model_id = id, kind = %record.kind(), path = %path.display(), "Persisted model");
        Ok(())
    }

    /// IDs of every model document in the directory, ascending
    pub async fn list_ids(&self) -> Result<Vec<ModelId>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ModelId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// `max(existing) + 1`, or 0 for an empty directory
    pub async fn next_id(&self) -> Result<ModelId> {
        Ok(self.list_ids().await?.last().map_or(0, |max| max + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{EmbedderSpec, LinearParams};
    use crate::model::IntentClassifierRecord;
    use crate::tokenizer::TokenizerMode;

    fn record() -> ModelRecord {
        ModelRecord::IntentClassifier(IntentClassifierRecord {
            embedder: EmbedderSpec::new("ru", TokenizerMode::Token),
            params: LinearParams {
                labels: vec!["a".into()],
                weights: vec![vec![0.125, -1.5]],
                bias: vec![0.5],
            },
        })
    }

    #[tokio::test]
    async fn test_next_id_on_empty_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ModelStorage::new(dir.path()).next_id().await.unwrap(), 0);
        assert_eq!(
            ModelStorage::new(dir.path().join("absent")).next_id().await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_next_id_after_writes_in_any_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ModelStorage::new(dir.path());

        for id in [2, 0, 1] {
            storage.write(id, &record()).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("draft.cube"), "{}").unwrap();

        assert_eq!(storage.list_ids().await.unwrap(), vec![0, 1, 2]);
        assert_eq!(storage.next_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_write_then_read_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ModelStorage::new(dir.path().join("nested"));

        storage.write(5, &record()).await.unwrap();
        assert!(storage.path_for(5).exists());
        assert_eq!(storage.read(5).await.unwrap(), record());

        let leftovers: Vec<_> = std::fs::read_dir(storage.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_read_errors_are_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ModelStorage::new(dir.path());

        assert!(matches!(
            storage.read(9).await,
            Err(Error::ModelNotFound { id: 9, .. })
        ));

        std::fs::write(storage.path_for(9), "{not json").unwrap();
        assert!(matches!(
            storage.read(9).await,
            Err(Error::ModelCorrupt { id: 9, .. })
        ));
    }
}
