//! Embedding generation.
//!
//! Two backends: an OpenAI-compatible HTTP endpoint, and a deterministic
//! local projection for offline runs and tests. The vector dimension is
//! fixed per backend; the store rejects mismatched vectors.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{RagError, Result};

/// Embedding backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible embeddings API.
    OpenAI,
    /// Deterministic local token projection (offline, test-friendly).
    #[default]
    Local,
}

/// Configuration for embedding generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Vector dimension; must match the index it feeds.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

/// Generates dense vectors for chunks and queries.
#[derive(Debug, Clone)]
pub struct EmbeddingGenerator {
    config: EmbeddingConfig,
    client: Client,
}

impl EmbeddingGenerator {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = Client::new();
        Self { config, client }
    }

    /// Fixed dimension of vectors produced by this backend.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Embed a batch of texts, preserving order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.config.provider {
            EmbeddingProvider::OpenAI => self.embed_remote(texts).await,
            EmbeddingProvider::Local => {
                Ok(texts.iter().map(|t| self.embed_local(t)).collect())
            }
        }
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_remote(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.endpoint);
        debug!("Embedding {} texts via {}", texts.len(), url);

        let request = EmbeddingsRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagError::Embedding(format!("HTTP {status}")));
        }
        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();

        for vector in &vectors {
            if vector.len() != self.config.dimensions {
                return Err(RagError::DimensionMismatch {
                    expected: self.config.dimensions,
                    got: vector.len(),
                });
            }
        }
        Ok(vectors)
    }

    /// Deterministic token projection: each token hashes to a bucket and a
    /// sign, vectors are L2-normalized. Identical text always produces the
    /// identical vector.
    fn embed_local(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions;
        let mut vector = vec![0f32; dims];

        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_generator() -> EmbeddingGenerator {
        EmbeddingGenerator::new(EmbeddingConfig {
            provider: EmbeddingProvider::Local,
            dimensions: 64,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn local_embeddings_are_deterministic() {
        let gen = local_generator();
        let a = gen.embed_query("quota attainment bonus").await.unwrap();
        let b = gen.embed_query("quota attainment bonus").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn local_embeddings_are_normalized() {
        let gen = local_generator();
        let v = gen.embed_query("some text to embed").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_text_differs() {
        let gen = local_generator();
        let a = gen.embed_query("revenue commission plan").await.unwrap();
        let b = gen.embed_query("unrelated walrus content").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let gen = local_generator();
        let batch = gen
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        let first = gen.embed_query("first").await.unwrap();
        assert_eq!(batch[0], first);
        assert_eq!(batch.len(), 2);
    }
}
