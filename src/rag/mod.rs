//! RAG engine: chunking, embedding, vector indexing and hybrid retrieval.

mod chunker;
mod embeddings;
mod engine;
mod indexer;
mod vector_store;

pub use chunker::{chunk_text, Chunker, CHUNK_OVERLAP, CHUNK_SIZE};
pub use embeddings::{EmbeddingConfig, EmbeddingGenerator, EmbeddingProvider};
pub use engine::{QueryHit, RagEngine, SearchMode};
pub use indexer::RagIndexer;
pub use vector_store::{HybridHit, IndexKind, KeywordHit, ScoredChunk, VectorStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Index error: {0}")]
    Index(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
