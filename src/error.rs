//! Error types for the murshid RAG pipeline.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to configuration loading and validation.
///
/// Invalid parameters are rejected at setup, never silently clamped.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors related to loading the embedding model.
///
/// These are fatal to pipeline readiness: a pipeline whose model cannot be
/// loaded transitions to the error state.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("failed to load model: {0}")]
    LoadError(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("inference error: {0}")]
    InferenceError(String),
}

/// Errors related to embedding individual inputs.
///
/// These are local to one chunk or query and never abort a whole batch.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty input")]
    EmptyInput,

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Errors related to the vector index and its on-disk form.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("index corrupted: {0}")]
    Corrupt(String),

    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no index found at {0}")]
    NotFound(String),

    #[error("metadata error: {0}")]
    MetadataError(#[from] serde_json::Error),
}

/// Errors related to retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("pipeline not ready: index not built or model not loaded")]
    NotReady,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Errors related to answer generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend timed out")]
    Timeout,

    #[error("generation backend error: {0}")]
    Backend(String),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("generation request failed: {0}")]
    RequestError(#[from] reqwest::Error),
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            // Timeouts are transient; the retrieved context can be reused
            GenerationError::Timeout => true,
            GenerationError::Backend(msg) => {
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.to_lowercase().contains("unavailable")
                    || msg.to_lowercase().contains("too many requests")
            }
            GenerationError::RequestError(e) => e.is_timeout() || e.is_connect(),
            // Malformed responses are not retryable
            GenerationError::InvalidResponse(_) => false,
        }
    }
}

/// Errors surfaced by the pipeline orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline initialization timed out")]
    InitializationTimeout,

    #[error("pipeline failed to initialize: {0}")]
    InitializationFailed(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("corpus error: {0}")]
    Corpus(String),

    #[error("no documents found in corpus")]
    EmptyCorpus,
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("{0}")]
    Other(String),
}
