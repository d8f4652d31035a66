//! Error types for cubeserve

use crate::types::ModelId;
use std::path::PathBuf;

/// Result type alias using cubeserve's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cubeserve operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requested model is absent from storage
    #[error("model {id} not found at {}", path.display())]
    ModelNotFound { id: ModelId, path: PathBuf },

    /// Persisted model document is unreadable or inconsistent
    #[error("model {id} is corrupt: {reason}")]
    ModelCorrupt { id: ModelId, reason: String },

    /// Embedder backend failed (status, timeout, malformed body)
    #[error("embedder backend error ({context}): {message}")]
    Backend { context: String, message: String },

    /// Malformed training or service configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A model of another family was requested through the wrong endpoint
    #[error("model {id} is a {found} model, expected {expected}")]
    WrongModelKind {
        id: ModelId,
        expected: &'static str,
        found: &'static str,
    },

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new model-corrupt error
    pub fn corrupt(id: ModelId, reason: impl Into<String>) -> Self {
        Self::ModelCorrupt {
            id,
            reason: reason.into(),
        }
    }

    /// Create a new backend error; `context` names the mode or URL involved
    pub fn backend(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error was caused by caller input rather than by the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound { .. } | Self::Config(_) | Self::WrongModelKind { .. }
        )
    }

    /// Short, stable name of the error kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound { .. } => "model_not_found",
            Self::ModelCorrupt { .. } => "model_corrupt",
            Self::Backend { .. } => "backend",
            Self::Config(_) => "config",
            Self::WrongModelKind { .. } => "wrong_model_kind",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}
