//! RAG engine: orchestrates chunking, embedding and retrieval.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::models::ChunkRecord;

use super::chunker::Chunker;
use super::embeddings::{EmbeddingConfig, EmbeddingGenerator};
use super::vector_store::{HybridHit, IndexKind, KeywordHit, ScoredChunk, VectorDocument, VectorStore};
use super::Result;

/// Retrieval mode for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vector" => Some(Self::Vector),
            "keyword" => Some(Self::Keyword),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Query results in any mode, normalized to a common shape.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub score: f64,
}

impl From<ScoredChunk> for QueryHit {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            metadata: chunk.metadata,
            score: chunk.similarity,
        }
    }
}

impl From<KeywordHit> for QueryHit {
    fn from(hit: KeywordHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            metadata: hit.metadata,
            score: hit.match_score as f64,
        }
    }
}

impl From<HybridHit> for QueryHit {
    fn from(hit: HybridHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            metadata: hit.metadata,
            score: hit.combined_score,
        }
    }
}

/// Main engine composing the chunker, embedding backend and vector store.
pub struct RagEngine {
    chunker: Chunker,
    embeddings: EmbeddingGenerator,
    store: VectorStore,
}

impl RagEngine {
    /// Create an engine rooted under `<data_dir>/rag_data`, loading any
    /// previously saved index.
    pub fn new(
        config: &EmbeddingConfig,
        data_dir: &Path,
        index_name: &str,
        kind: IndexKind,
    ) -> Result<Self> {
        let store_dir: PathBuf = data_dir.join("rag_data").join("vector_store");
        let embeddings = EmbeddingGenerator::new(config.clone());
        let mut store = VectorStore::new(embeddings.dimensions(), kind, &store_dir, index_name);
        if store.load()? {
            info!("Vector store contains {} documents", store.len());
        }

        Ok(Self {
            chunker: Chunker::default(),
            embeddings,
            store,
        })
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Chunk, embed and index one document's content. Returns the number of
    /// chunks added.
    pub async fn index_content(
        &mut self,
        content: &str,
        document_id: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<usize> {
        let chunks = self.chunker.chunk(content, document_id);
        if chunks.is_empty() {
            return Ok(0);
        }
        let added = self.index_chunks(&chunks, metadata).await?;
        self.store.save()?;
        Ok(added)
    }

    /// Embed and insert pre-built chunks without saving.
    pub async fn index_chunks(
        &mut self,
        chunks: &[ChunkRecord],
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embeddings.embed(&texts).await?;

        let documents: Vec<VectorDocument> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut chunk_metadata = metadata.clone();
                chunk_metadata.insert("chunk_id".into(), chunk.chunk_id.clone().into());
                chunk_metadata.insert("document_id".into(), chunk.document_id.clone().into());
                chunk_metadata.insert("position".into(), chunk.position.into());
                VectorDocument {
                    chunk_id: chunk.chunk_id.clone(),
                    text: chunk.text.clone(),
                    embedding,
                    metadata: chunk_metadata,
                }
            })
            .collect();

        let inserted = self.store.add_documents(documents);
        info!(
            "Indexed {} chunks ({} accepted)",
            chunks.len(),
            inserted.len()
        );
        Ok(inserted.len())
    }

    /// Persist the index to disk.
    pub fn save(&self) -> Result<()> {
        self.store.save()
    }

    /// Query the index in the given mode.
    pub async fn query(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
        alpha: f64,
    ) -> Result<Vec<QueryHit>> {
        info!("Searching with query: '{}' ({:?})", query, mode);
        let hits = match mode {
            SearchMode::Keyword => self
                .store
                .keyword_search(query, k, None)
                .into_iter()
                .map(QueryHit::from)
                .collect(),
            SearchMode::Vector => {
                let query_vec = self.embeddings.embed_query(query).await?;
                self.store
                    .similarity_search(&query_vec, k, None)
                    .into_iter()
                    .map(QueryHit::from)
                    .collect()
            }
            SearchMode::Hybrid => {
                let query_vec = self.embeddings.embed_query(query).await?;
                self.store
                    .hybrid_search(query, &query_vec, k, alpha, None)
                    .into_iter()
                    .map(QueryHit::from)
                    .collect()
            }
        };
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embeddings::EmbeddingProvider;

    fn test_engine(dir: &Path) -> RagEngine {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Local,
            dimensions: 64,
            ..Default::default()
        };
        RagEngine::new(&config, dir, "test", IndexKind::Flat).unwrap()
    }

    #[tokio::test]
    async fn index_and_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());

        let added = engine
            .index_content(
                "Quota attainment drives the quarterly bonus payout.",
                "doc-1",
                &serde_json::Map::new(),
            )
            .await
            .unwrap();
        assert_eq!(added, 1);

        let hits = engine
            .query("quota bonus", 5, SearchMode::Hybrid, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["document_id"], "doc-1");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn saved_index_reloads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut engine = test_engine(dir.path());
            engine
                .index_content("persisted content here", "doc-2", &serde_json::Map::new())
                .await
                .unwrap();
        }
        let engine = test_engine(dir.path());
        assert_eq!(engine.store().len(), 1);
    }

    #[tokio::test]
    async fn empty_content_indexes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        let added = engine
            .index_content("", "doc-3", &serde_json::Map::new())
            .await
            .unwrap();
        assert_eq!(added, 0);
    }
}
