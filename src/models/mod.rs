//! Data models for documents, chunks, answers, and configuration.

mod answer;
mod config;
mod document;

pub use answer::{
    Answer, HealthReport, IndexReport, OutputFormat, PipelineState, QueryOptions, RetrievedChunk,
};
pub use config::{
    ChunkingConfig, Config, EmbeddingConfig, GenerationConfig, IndexConfig, PipelineConfig,
    RetrievalConfig, SIMILARITY_METRIC,
};
pub use document::{Chunk, SourceDocument};
