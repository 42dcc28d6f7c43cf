//! Query-side models: retrieval results, answers, and pipeline status.

use serde::{Deserialize, Serialize};

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Pipeline lifecycle state, readable at any time via the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum PipelineState {
    Uninitialized,
    Initializing,
    Ready,
    Error(String),
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Uninitialized => write!(f, "uninitialized"),
            PipelineState::Initializing => write!(f, "initializing"),
            PipelineState::Ready => write!(f, "ready"),
            PipelineState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// A chunk returned by retrieval, with its similarity score. Ephemeral,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub score: f32,
}

/// A generated answer together with its grounding information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,

    /// Concatenated retrieved context, when the caller asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Source references of the chunks that backed the answer.
    pub sources: Vec<String>,

    /// False when no relevant chunks were retrieved and the backend answered
    /// from the question alone. Callers should warn users in that case.
    pub grounded: bool,
}

/// Per-query options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Include the retrieved context verbatim in the answer.
    pub include_context: bool,

    /// Override the configured top-k for this query.
    pub top_k: Option<u32>,
}

/// Snapshot of the pipeline state for health reporting. Always reflects the
/// true state; never reports ready while degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub state: PipelineState,
    pub index_ready: bool,
    pub chunk_count: u64,
}

/// Result of an index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub status: String,
    pub documents_indexed: u64,
    pub chunk_count: u64,
    pub skipped_chunks: u64,
    pub duration_ms: u64,
}
