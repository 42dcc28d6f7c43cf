//! Core pipeline services.

pub mod chunker;
pub mod embedding;
pub mod generator;
pub mod pipeline;
pub mod retriever;
pub mod vector_index;

pub use chunker::TextChunker;
pub use embedding::{Embedder, EmbeddingBackend, OnnxBackend};
pub use generator::{AnswerStream, GenerationBackend, Generator, HttpBackend};
pub use pipeline::RagPipeline;
pub use retriever::{Retriever, SharedIndex};
pub use vector_index::{IndexEntry, IndexManifest, ScoredEntry, VectorIndex};
