//! Error type shared by every layer of the workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong between reading markdown and streaming an answer.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding or generation endpoint could not be reached.
    #[error("model service unreachable at {endpoint}: {message}")]
    ServiceUnavailable { endpoint: String, message: String },

    /// The configured model is not installed on the service.
    #[error("model '{model}' is not available on the model service")]
    ModelNotFound { model: String, available: Vec<String> },

    /// No snapshot exists at the configured location.
    #[error("no index snapshot found at {}", .0.display())]
    IndexNotFound(PathBuf),

    /// A snapshot exists but failed its integrity checks.
    #[error("index snapshot at {} is corrupt: {reason}", path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    /// A snapshot is intact but was built with a different embedding setup.
    #[error("index snapshot is out of date: {reason}")]
    IndexStale { reason: String },

    /// The document directory holds nothing to index.
    #[error("no markdown documents to index in {}", .0.display())]
    EmptyDocumentStore(PathBuf),

    /// The generative model failed or produced a truncated answer.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The caller stopped the turn before it finished.
    #[error("turn cancelled")]
    Cancelled,

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not convert {}: {message}", path.display())]
    Conversion { path: PathBuf, message: String },

    #[error("index storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether a single retry after a short backoff might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::ServiceUnavailable { .. } | RagError::Timeout { .. })
    }

    /// What the user can do about it.
    pub fn hint(&self) -> Option<String> {
        match self {
            RagError::ServiceUnavailable { .. } => {
                Some("start the model service with `ollama serve` and try again".to_string())
            }
            RagError::ModelNotFound { model, available } => {
                let mut hint = format!("install it with `ollama pull {model}`");
                if !available.is_empty() {
                    hint.push_str(&format!(" (installed: {})", available.join(", ")));
                }
                Some(hint)
            }
            RagError::IndexNotFound(_) | RagError::IndexCorrupt { .. } | RagError::IndexStale { .. } => {
                Some("rebuild the index with /rebuild or --rebuild".to_string())
            }
            RagError::EmptyDocumentStore(_) => Some(
                "convert your PDFs first (--convert) or point --data-dir at a folder of markdown files"
                    .to_string(),
            ),
            RagError::DimensionMismatch { .. } => {
                Some("the embedding model changed since the index was built; run /rebuild".to_string())
            }
            RagError::Timeout { .. } => {
                Some("the model may still be loading; raise RAG_REQUEST_TIMEOUT_SECS or retry".to_string())
            }
            RagError::GenerationFailed(_) => Some("ask again or pick another model with --model".to_string()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
