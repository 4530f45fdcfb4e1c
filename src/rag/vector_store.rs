//! Vector store with exact, inverted-file and hierarchical indexes.
//!
//! Vectors and per-chunk metadata persist as two files: a little-endian f32
//! vector file and a JSON metadata file carrying `dimensions` and
//! `index_type` for sanity-checking on load. Distances are squared L2, which
//! orders identically to true L2.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{RagError, Result};

/// Magic prefix of the vector file format.
const VEC_MAGIC: &[u8; 4] = b"SPMV";

/// Index structure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact flat L2 scan.
    #[default]
    Flat,
    /// Inverted-file index; trains on first insertion.
    Ivf,
    /// Hierarchical graph; no training.
    Hnsw,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Ivf => "ivf",
            Self::Hnsw => "hnsw",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "flat" => Some(Self::Flat),
            "ivf" => Some(Self::Ivf),
            "hnsw" => Some(Self::Hnsw),
            _ => None,
        }
    }
}

/// A chunk to insert: text, embedding and metadata.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub chunk_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Vector search result.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// `1 / (1 + distance)`.
    pub similarity: f64,
    pub distance: f64,
}

/// Keyword search result.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Summed occurrence count across searched fields.
    pub match_score: u64,
}

/// Hybrid search result.
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub combined_score: f64,
    pub vector_score: f64,
    pub keyword_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    text: String,
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMetadata {
    dimensions: usize,
    index_type: IndexKind,
    doc_ids: Vec<String>,
    documents: HashMap<String, StoredChunk>,
}

fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum()
}

/// Inverted-file index: a k-means coarse quantizer over trained centroids
/// plus per-centroid posting lists.
#[derive(Debug, Default)]
struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
    trained: bool,
}

impl IvfIndex {
    /// Train on the first insertion once at least one vector exists.
    fn train(&mut self, vectors: &[Vec<f32>]) {
        let nlist = vectors.len().min(100).max(1);
        // Deterministic init: evenly spaced sample vectors
        let step = (vectors.len() / nlist).max(1);
        self.centroids = (0..nlist).map(|i| vectors[i * step].clone()).collect();

        // A few Lloyd iterations are enough for a coarse quantizer
        for _ in 0..8 {
            let mut sums: Vec<Vec<f64>> =
                vec![vec![0.0; vectors[0].len()]; self.centroids.len()];
            let mut counts = vec![0usize; self.centroids.len()];
            for vector in vectors {
                let nearest = self.nearest_centroid(vector);
                counts[nearest] += 1;
                for (s, v) in sums[nearest].iter_mut().zip(vector) {
                    *s += f64::from(*v);
                }
            }
            for (centroid, (sum, count)) in self
                .centroids
                .iter_mut()
                .zip(sums.iter().zip(counts.iter()))
            {
                if *count > 0 {
                    for (c, s) in centroid.iter_mut().zip(sum) {
                        *c = (*s / *count as f64) as f32;
                    }
                }
            }
        }

        self.lists = vec![Vec::new(); self.centroids.len()];
        self.trained = true;
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                squared_l2(a, vector)
                    .partial_cmp(&squared_l2(b, vector))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn add(&mut self, index: usize, vector: &[f32]) {
        let list = self.nearest_centroid(vector);
        self.lists[list].push(index);
    }

    /// Candidate rows from the nearest `nprobe` posting lists.
    fn candidates(&self, query: &[f32]) -> Vec<usize> {
        let nprobe = (self.centroids.len() / 10).max(1);
        let mut ranked: Vec<(usize, f64)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, squared_l2(c, query)))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(nprobe)
            .flat_map(|(i, _)| self.lists[i].iter().copied())
            .collect()
    }
}

/// Hierarchical graph index. Levels are drawn geometrically; each node keeps
/// up to `M` neighbors per level. No training step.
#[derive(Debug)]
struct HnswIndex {
    m: usize,
    ef: usize,
    /// Per node: highest level it appears on.
    levels: Vec<u8>,
    /// neighbors[level][node] -> neighbor rows.
    neighbors: Vec<HashMap<usize, Vec<usize>>>,
    entry: Option<usize>,
}

impl HnswIndex {
    fn new() -> Self {
        Self {
            m: 16,
            ef: 32,
            levels: Vec::new(),
            neighbors: Vec::new(),
            entry: None,
        }
    }

    fn draw_level(&self) -> u8 {
        let mut level = 0u8;
        let mut rng = rand::rng();
        while level < 8 && rng.random_range(0.0..1.0) < 0.5f64 {
            level += 1;
        }
        level
    }

    fn insert(&mut self, index: usize, vectors: &[Vec<f32>]) {
        let level = self.draw_level();
        if self.levels.len() <= index {
            self.levels.resize(index + 1, 0);
        }
        self.levels[index] = level;
        while self.neighbors.len() <= level as usize {
            self.neighbors.push(HashMap::new());
        }

        let Some(entry) = self.entry else {
            self.entry = Some(index);
            return;
        };

        let query = &vectors[index];
        let top = self.top_level();
        let mut current = entry;

        // Greedy descent above the node's level
        let mut l = top;
        while l > level {
            current = self.greedy_step(current, query, l as usize, vectors);
            l -= 1;
        }

        // Connect on each level from the node's level down to 0
        for l in (0..=level.min(top)).rev() {
            let candidates = self.beam_search(current, query, l as usize, self.ef, vectors);
            let selected: Vec<usize> =
                candidates.iter().take(self.m).map(|(i, _)| *i).collect();
            for neighbor in &selected {
                self.link(l as usize, index, *neighbor, vectors);
                self.link(l as usize, *neighbor, index, vectors);
            }
            if let Some((best, _)) = candidates.first() {
                current = *best;
            }
        }

        if level > self.levels[entry] {
            self.entry = Some(index);
        }
    }

    fn top_level(&self) -> u8 {
        self.entry.map(|e| self.levels[e]).unwrap_or(0)
    }

    fn link(&mut self, level: usize, from: usize, to: usize, vectors: &[Vec<f32>]) {
        if from == to {
            return;
        }
        let list = self.neighbors[level].entry(from).or_default();
        if list.contains(&to) {
            return;
        }
        list.push(to);
        if list.len() > self.m {
            // Keep the closest M
            let query = vectors[from].clone();
            list.sort_by(|a, b| {
                squared_l2(&vectors[*a], &query)
                    .partial_cmp(&squared_l2(&vectors[*b], &query))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            list.truncate(self.m);
        }
    }

    fn greedy_step(
        &self,
        start: usize,
        query: &[f32],
        level: usize,
        vectors: &[Vec<f32>],
    ) -> usize {
        let mut current = start;
        let mut best = squared_l2(&vectors[current], query);
        loop {
            let mut improved = false;
            if let Some(neighbors) = self.neighbors[level].get(&current) {
                for &n in neighbors {
                    let d = squared_l2(&vectors[n], query);
                    if d < best {
                        best = d;
                        current = n;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one level, returning (row, distance) sorted ascending.
    fn beam_search(
        &self,
        start: usize,
        query: &[f32],
        level: usize,
        ef: usize,
        vectors: &[Vec<f32>],
    ) -> Vec<(usize, f64)> {
        let mut visited = std::collections::HashSet::new();
        let mut frontier = vec![start];
        visited.insert(start);
        let mut results: Vec<(usize, f64)> = vec![(start, squared_l2(&vectors[start], query))];

        while let Some(node) = frontier.pop() {
            if let Some(neighbors) = self.neighbors[level].get(&node) {
                for &n in neighbors {
                    if visited.insert(n) {
                        let d = squared_l2(&vectors[n], query);
                        results.push((n, d));
                        // Expand only while the beam is not saturated with
                        // closer nodes
                        let worst = results
                            .iter()
                            .map(|(_, d)| *d)
                            .fold(f64::NEG_INFINITY, f64::max);
                        if results.len() < ef || d < worst {
                            frontier.push(n);
                        }
                    }
                }
            }
        }

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(ef.max(1));
        results
    }

    fn search(&self, query: &[f32], k: usize, vectors: &[Vec<f32>]) -> Vec<usize> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut current = entry;
        for l in (1..=self.top_level()).rev() {
            current = self.greedy_step(current, query, l as usize, vectors);
        }
        self.beam_search(current, query, 0, self.ef.max(k * 2), vectors)
            .into_iter()
            .map(|(i, _)| i)
            .take(k.max(1))
            .collect()
    }
}

/// Stores and retrieves chunk embeddings with hybrid search.
pub struct VectorStore {
    dimensions: usize,
    kind: IndexKind,
    store_dir: PathBuf,
    index_name: String,
    vectors: Vec<Vec<f32>>,
    doc_ids: Vec<String>,
    documents: HashMap<String, StoredChunk>,
    ivf: IvfIndex,
    hnsw: HnswIndex,
}

impl VectorStore {
    pub fn new(
        dimensions: usize,
        kind: IndexKind,
        store_dir: impl AsRef<Path>,
        index_name: &str,
    ) -> Self {
        Self {
            dimensions,
            kind,
            store_dir: store_dir.as_ref().to_path_buf(),
            index_name: index_name.to_string(),
            vectors: Vec::new(),
            doc_ids: Vec::new(),
            documents: HashMap::new(),
            ivf: IvfIndex::default(),
            hnsw: HnswIndex::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    fn vector_path(&self) -> PathBuf {
        self.store_dir.join(format!("{}.vec", self.index_name))
    }

    fn metadata_path(&self) -> PathBuf {
        self.store_dir.join(format!("{}.meta.json", self.index_name))
    }

    /// Add documents with embeddings. Vectors whose dimension does not match
    /// the index are rejected with a logged warning. Returns inserted ids.
    pub fn add_documents(&mut self, documents: Vec<VectorDocument>) -> Vec<String> {
        let mut inserted = Vec::new();

        for doc in documents {
            if doc.embedding.len() != self.dimensions {
                warn!(
                    "Embedding dimension mismatch for {}: {} vs {}",
                    doc.chunk_id,
                    doc.embedding.len(),
                    self.dimensions
                );
                continue;
            }

            let row = self.vectors.len();
            self.vectors.push(doc.embedding);
            self.doc_ids.push(doc.chunk_id.clone());
            self.documents.insert(
                doc.chunk_id.clone(),
                StoredChunk {
                    text: doc.text,
                    metadata: doc.metadata,
                },
            );

            match self.kind {
                IndexKind::Flat => {}
                IndexKind::Ivf => {
                    if !self.ivf.trained {
                        self.ivf.train(&self.vectors);
                        // Backfill rows inserted before training
                        for earlier in 0..row {
                            let vector = self.vectors[earlier].clone();
                            self.ivf.add(earlier, &vector);
                        }
                    }
                    let vector = self.vectors[row].clone();
                    self.ivf.add(row, &vector);
                }
                IndexKind::Hnsw => {
                    let vectors = std::mem::take(&mut self.vectors);
                    self.hnsw.insert(row, &vectors);
                    self.vectors = vectors;
                }
            }
            inserted.push(doc.chunk_id);
        }

        if !inserted.is_empty() {
            info!(
                "Added {} documents to index, total: {}",
                inserted.len(),
                self.doc_ids.len()
            );
        }
        inserted
    }

    fn row_to_scored(&self, row: usize, distance: f64) -> Option<ScoredChunk> {
        let id = self.doc_ids.get(row)?;
        let doc = self.documents.get(id)?;
        Some(ScoredChunk {
            id: id.clone(),
            text: doc.text.clone(),
            metadata: doc.metadata.clone(),
            similarity: 1.0 / (1.0 + distance),
            distance,
        })
    }

    /// Nearest documents by ascending L2 distance.
    ///
    /// Over-fetches `2k` when a filter is supplied, then filters.
    pub fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&dyn Fn(&ScoredChunk) -> bool>,
    ) -> Vec<ScoredChunk> {
        if self.is_empty() {
            warn!("Index is empty");
            return Vec::new();
        }
        if query.len() != self.dimensions {
            warn!(
                "Query embedding dimension mismatch: {} vs {}",
                query.len(),
                self.dimensions
            );
            return Vec::new();
        }

        let fetch = if filter.is_some() { k * 2 } else { k }.max(1);
        let candidate_rows: Vec<usize> = match self.kind {
            IndexKind::Flat => (0..self.vectors.len()).collect(),
            IndexKind::Ivf if self.ivf.trained => self.ivf.candidates(query),
            IndexKind::Ivf => (0..self.vectors.len()).collect(),
            IndexKind::Hnsw => self.hnsw.search(query, fetch, &self.vectors),
        };

        let mut ranked: Vec<(usize, f64)> = candidate_rows
            .into_iter()
            .map(|row| (row, squared_l2(&self.vectors[row], query)))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut results = Vec::new();
        for (row, distance) in ranked.into_iter().take(fetch) {
            let Some(scored) = self.row_to_scored(row, distance) else {
                continue;
            };
            if let Some(filter) = filter {
                if !filter(&scored) {
                    continue;
                }
            }
            results.push(scored);
            if results.len() >= k {
                break;
            }
        }
        results
    }

    /// Keyword search: lowercased token occurrence counts across the
    /// configured fields (default: chunk text only). Zero-match documents
    /// are excluded.
    pub fn keyword_search(&self, query: &str, k: usize, fields: Option<&[String]>) -> Vec<KeywordHit> {
        if self.is_empty() {
            warn!("Index is empty");
            return Vec::new();
        }
        let keywords: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if keywords.is_empty() {
            return Vec::new();
        }

        let default_fields = ["text".to_string()];
        let fields = fields.unwrap_or(&default_fields);

        let mut hits: Vec<KeywordHit> = Vec::new();
        for id in &self.doc_ids {
            let Some(doc) = self.documents.get(id) else {
                continue;
            };
            let mut score = 0u64;
            for field in fields {
                let haystack = if field == "text" {
                    doc.text.to_lowercase()
                } else {
                    match doc.metadata.get(field) {
                        Some(value) => value.to_string().to_lowercase(),
                        None => continue,
                    }
                };
                for keyword in &keywords {
                    score += haystack.matches(keyword.as_str()).count() as u64;
                }
            }
            if score > 0 {
                hits.push(KeywordHit {
                    id: id.clone(),
                    text: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                    match_score: score,
                });
            }
        }

        hits.sort_by(|a, b| b.match_score.cmp(&a.match_score).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        hits
    }

    /// Combined vector and keyword search.
    ///
    /// Keyword scores are normalized by the maximum in the keyword result;
    /// combined score is `alpha * similarity + (1 - alpha) * keyword`.
    /// `alpha = 0` is pure keyword, `alpha = 1` pure vector.
    pub fn hybrid_search(
        &self,
        query: &str,
        query_vec: &[f32],
        k: usize,
        alpha: f64,
        filter: Option<&dyn Fn(&ScoredChunk) -> bool>,
    ) -> Vec<HybridHit> {
        let vector_results = self.similarity_search(query_vec, k * 2, filter);
        let keyword_results = self.keyword_search(query, k * 2, None);

        if vector_results.is_empty() && keyword_results.is_empty() {
            return Vec::new();
        }

        let max_keyword = keyword_results
            .iter()
            .map(|hit| hit.match_score)
            .max()
            .unwrap_or(1)
            .max(1);

        let mut combined: HashMap<String, HybridHit> = HashMap::new();
        for hit in &vector_results {
            combined.insert(
                hit.id.clone(),
                HybridHit {
                    id: hit.id.clone(),
                    text: hit.text.clone(),
                    metadata: hit.metadata.clone(),
                    combined_score: 0.0,
                    vector_score: hit.similarity,
                    keyword_score: 0.0,
                },
            );
        }
        for hit in &keyword_results {
            let keyword_score = hit.match_score as f64 / max_keyword as f64;
            combined
                .entry(hit.id.clone())
                .and_modify(|entry| entry.keyword_score = keyword_score)
                .or_insert_with(|| HybridHit {
                    id: hit.id.clone(),
                    text: hit.text.clone(),
                    metadata: hit.metadata.clone(),
                    combined_score: 0.0,
                    vector_score: 0.0,
                    keyword_score,
                });
        }

        let mut hits: Vec<HybridHit> = combined
            .into_values()
            .map(|mut hit| {
                hit.combined_score = alpha * hit.vector_score + (1.0 - alpha) * hit.keyword_score;
                hit
            })
            .collect();
        hits.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }

    /// Save the vector file and the metadata file.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store_dir)?;

        let mut buffer = Vec::with_capacity(16 + self.vectors.len() * self.dimensions * 4);
        buffer.extend_from_slice(VEC_MAGIC);
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        buffer.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for vector in &self.vectors {
            for value in vector {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }
        let mut file = std::fs::File::create(self.vector_path())?;
        file.write_all(&buffer)?;

        let metadata = StoreMetadata {
            dimensions: self.dimensions,
            index_type: self.kind,
            doc_ids: self.doc_ids.clone(),
            documents: self.documents.clone(),
        };
        serde_json::to_writer(std::fs::File::create(self.metadata_path())?, &metadata)?;

        info!(
            "Saved index with {} documents to {}",
            self.doc_ids.len(),
            self.vector_path().display()
        );
        Ok(())
    }

    /// Restore both files. Returns false when no saved index exists.
    pub fn load(&mut self) -> Result<bool> {
        let vector_path = self.vector_path();
        let metadata_path = self.metadata_path();
        if !vector_path.exists() || !metadata_path.exists() {
            return Ok(false);
        }

        let metadata: StoreMetadata =
            serde_json::from_reader(std::fs::File::open(&metadata_path)?)?;
        if metadata.dimensions != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                got: metadata.dimensions,
            });
        }

        let mut raw = Vec::new();
        std::fs::File::open(&vector_path)?.read_to_end(&mut raw)?;
        if raw.len() < 20 || &raw[0..4] != VEC_MAGIC {
            return Err(RagError::Index("corrupt vector file header".to_string()));
        }
        let dims = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize;
        let count = u64::from_le_bytes([
            raw[12], raw[13], raw[14], raw[15], raw[16], raw[17], raw[18], raw[19],
        ]) as usize;
        if dims != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                got: dims,
            });
        }
        let expected_len = 20 + count * dims * 4;
        if raw.len() < expected_len {
            return Err(RagError::Index("truncated vector file".to_string()));
        }

        let mut vectors = Vec::with_capacity(count);
        let mut offset = 20;
        for _ in 0..count {
            let mut vector = Vec::with_capacity(dims);
            for _ in 0..dims {
                let bytes = [raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]];
                vector.push(f32::from_le_bytes(bytes));
                offset += 4;
            }
            vectors.push(vector);
        }

        self.vectors = vectors;
        self.doc_ids = metadata.doc_ids;
        self.documents = metadata.documents;
        self.kind = metadata.index_type;
        self.rebuild_derived();

        info!(
            "Loaded index with {} documents from {}",
            self.doc_ids.len(),
            vector_path.display()
        );
        Ok(true)
    }

    /// Rebuild the IVF/HNSW structures from raw vectors after a load.
    fn rebuild_derived(&mut self) {
        match self.kind {
            IndexKind::Flat => {}
            IndexKind::Ivf => {
                self.ivf = IvfIndex::default();
                if !self.vectors.is_empty() {
                    self.ivf.train(&self.vectors);
                    for row in 0..self.vectors.len() {
                        let vector = self.vectors[row].clone();
                        self.ivf.add(row, &vector);
                    }
                }
            }
            IndexKind::Hnsw => {
                self.hnsw = HnswIndex::new();
                let vectors = std::mem::take(&mut self.vectors);
                for row in 0..vectors.len() {
                    self.hnsw.insert(row, &vectors);
                }
                self.vectors = vectors;
            }
        }
    }

    /// Index statistics for `rag stats`.
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "index_type": self.kind.as_str(),
            "dimensions": self.dimensions,
            "document_count": self.doc_ids.len(),
            "index_file": self.vector_path().display().to_string(),
            "is_trained": !matches!(self.kind, IndexKind::Ivf) || self.ivf.trained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, embedding: Vec<f32>) -> VectorDocument {
        VectorDocument {
            chunk_id: id.to_string(),
            text: text.to_string(),
            embedding,
            metadata: serde_json::Map::new(),
        }
    }

    fn flat_store() -> VectorStore {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(3, IndexKind::Flat, dir.path(), "test");
        store.add_documents(vec![
            doc("a", "quota bonus plan", vec![1.0, 0.0, 0.0]),
            doc("b", "commission schedule", vec![0.0, 1.0, 0.0]),
            doc("c", "quota quota quota", vec![0.0, 0.0, 1.0]),
        ]);
        store
    }

    #[test]
    fn similarity_orders_by_distance() {
        let store = flat_store();
        let results = store.similarity_search(&[0.9, 0.1, 0.0], 3, None);
        assert_eq!(results[0].id, "a");
        assert!(results[0].similarity > results[1].similarity);
        assert!((results[0].similarity - 1.0 / (1.0 + results[0].distance)).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut store = flat_store();
        let inserted = store.add_documents(vec![doc("bad", "text", vec![1.0, 2.0])]);
        assert!(inserted.is_empty());
        assert_eq!(store.len(), 3);

        let results = store.similarity_search(&[1.0, 0.0], 3, None);
        assert!(results.is_empty());
    }

    #[test]
    fn keyword_search_counts_and_excludes_zero() {
        let store = flat_store();
        let hits = store.keyword_search("quota", 10, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "c");
        assert_eq!(hits[0].match_score, 3);
    }

    #[test]
    fn hybrid_alpha_extremes() {
        let store = flat_store();
        let query_vec = [0.0, 1.0, 0.0];

        // alpha = 1: pure vector, b wins
        let vector_only = store.hybrid_search("quota", &query_vec, 1, 1.0, None);
        assert_eq!(vector_only[0].id, "b");

        // alpha = 0: pure keyword, c wins
        let keyword_only = store.hybrid_search("quota", &query_vec, 1, 0.0, None);
        assert_eq!(keyword_only[0].id, "c");
    }

    #[test]
    fn filter_over_fetches() {
        let store = flat_store();
        let filter = |chunk: &ScoredChunk| chunk.id != "a";
        let results = store.similarity_search(&[1.0, 0.0, 0.0], 1, Some(&filter));
        assert_eq!(results.len(), 1);
        assert_ne!(results[0].id, "a");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(3, IndexKind::Flat, dir.path(), "rt");
        store.add_documents(vec![
            doc("x", "alpha", vec![1.0, 2.0, 3.0]),
            doc("y", "beta", vec![4.0, 5.0, 6.0]),
        ]);
        store.save().unwrap();

        let mut restored = VectorStore::new(3, IndexKind::Flat, dir.path(), "rt");
        assert!(restored.load().unwrap());
        assert_eq!(restored.len(), 2);
        let results = restored.similarity_search(&[1.0, 2.0, 3.0], 1, None);
        assert_eq!(results[0].id, "x");
        assert!(results[0].distance < 1e-9);
    }

    #[test]
    fn load_rejects_wrong_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(3, IndexKind::Flat, dir.path(), "dims");
        store.add_documents(vec![doc("x", "alpha", vec![1.0, 2.0, 3.0])]);
        store.save().unwrap();

        let mut wrong = VectorStore::new(4, IndexKind::Flat, dir.path(), "dims");
        assert!(wrong.load().is_err());
    }

    #[test]
    fn ivf_trains_on_first_insertion() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(3, IndexKind::Ivf, dir.path(), "ivf");
        assert!(!store.ivf.trained);
        store.add_documents(vec![doc("a", "first", vec![1.0, 0.0, 0.0])]);
        assert!(store.ivf.trained);

        store.add_documents(vec![
            doc("b", "second", vec![0.0, 1.0, 0.0]),
            doc("c", "third", vec![0.9, 0.1, 0.0]),
        ]);
        let results = store.similarity_search(&[1.0, 0.0, 0.0], 2, None);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn hnsw_finds_nearest() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(2, IndexKind::Hnsw, dir.path(), "hnsw");
        let docs: Vec<VectorDocument> = (0..50)
            .map(|i| {
                let angle = i as f32 * 0.12;
                doc(
                    &format!("n{i}"),
                    "point",
                    vec![angle.cos(), angle.sin()],
                )
            })
            .collect();
        store.add_documents(docs);

        let results = store.similarity_search(&[1.0, 0.0], 3, None);
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "n0");
    }
}
