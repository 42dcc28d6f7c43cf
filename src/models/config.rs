use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_GENERATION_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_GENERATION_MODEL: &str = "qwen2.5:7b-instruct";
pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "intfloat/multilingual-e5-small";

/// Similarity metric used by every index this build produces. Recorded in
/// the index manifest and asserted on load, so an index can never be queried
/// with a different metric than it was built with.
pub const SIMILARITY_METRIC: &str = "cosine";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("murshid").join("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            return Ok(config);
        }
        Ok(Self::default())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject invalid parameter combinations outright; nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size_words == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size_words must be greater than zero".to_string(),
            ));
        }
        if self.chunking.overlap_words >= self.chunking.chunk_size_words {
            return Err(ConfigError::ValidationError(format!(
                "overlap_words ({}) must be smaller than chunk_size_words ({})",
                self.chunking.overlap_words, self.chunking.chunk_size_words
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "top_k must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding index generations and the active-index pointer.
    pub fn index_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.index.data_dir {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murshid")
            .join("index")
    }
}

/// Chunking parameters, measured in whitespace-delimited words.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size_words")]
    pub chunk_size_words: u32,

    #[serde(default = "default_overlap_words")]
    pub overlap_words: u32,
}

fn default_chunk_size_words() -> u32 {
    180
}

fn default_overlap_words() -> u32 {
    30
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_words: default_chunk_size_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model_id")]
    pub model_id: String,

    /// Explicit model directory; defaults to the data dir keyed by model id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_embedding_model_id() -> String {
    DEFAULT_EMBEDDING_MODEL_ID.to_string()
}

fn default_dimension() -> u32 {
    384
}

fn default_max_tokens() -> u32 {
    512
}

fn default_batch_size() -> u32 {
    8
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: default_embedding_model_id(),
            model_path: None,
            dimension: default_dimension(),
            max_tokens: default_max_tokens(),
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    pub fn resolved_model_dir(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.model_path {
            return Some(path.clone());
        }
        dirs::data_dir().map(|p| {
            p.join("murshid")
                .join("models")
                .join(self.model_id.replace('/', "--"))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Override for the index directory; defaults under the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/*.json".to_string(),
        "**/*.csv".to_string(),
    ]
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_file_size: default_max_file_size(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Relevance floor; chunks scoring below it are dropped before generation.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_top_k() -> u32 {
    5
}

fn default_min_score() -> f32 {
    0.25
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub base_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Character budget for the retrieved context in the prompt. Truncation
    /// drops lowest-scoring chunks whole, never mid-chunk.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: u32,

    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
}

fn default_generation_url() -> String {
    DEFAULT_GENERATION_URL.to_string()
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_max_context_chars() -> u32 {
    12_000
}

fn default_max_answer_tokens() -> u32 {
    1024
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_url(),
            model: default_generation_model(),
            api_key: None,
            timeout_secs: default_generation_timeout(),
            max_context_chars: default_max_context_chars(),
            max_answer_tokens: default_max_answer_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How long a query blocks while the pipeline is initializing before it
    /// fails with an initialization-timeout error. Zero fails immediately.
    #[serde(default = "default_init_wait_timeout_ms")]
    pub init_wait_timeout_ms: u64,
}

fn default_init_wait_timeout_ms() -> u64 {
    30_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            init_wait_timeout_ms: default_init_wait_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.base_url, DEFAULT_GENERATION_URL);
        assert_eq!(config.embedding.model_id, DEFAULT_EMBEDDING_MODEL_ID);
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().is_some());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_size_words = 20;
        config.chunking.overlap_words = 20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.chunking.overlap_words = 25;
        assert!(config.validate().is_err());

        config.chunking.overlap_words = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = Config::default();
        config.chunking.chunk_size_words = 0;
        config.chunking.overlap_words = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunking_defaults() {
        let config = ChunkingConfig::default();
        assert!(config.overlap_words < config.chunk_size_words);
    }
}
