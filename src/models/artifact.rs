//! Typed stage artifacts.
//!
//! Each stage writes a named structure instead of an untyped map; the only
//! untyped leaf is the `raw_text` fallback when an LLM response fails to
//! parse as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structural breakdown captured during extraction, populated per format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStructure {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slides: Vec<SlideContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sheets: Vec<SheetContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headings: Vec<Heading>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideContent {
    pub number: usize,
    pub title: Option<String>,
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetContent {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableContent {
    /// Page or slide the table came from, when known.
    pub page: Option<usize>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    pub style: Option<String>,
    pub text: String,
}

/// A retrieval-ready chunk of extracted content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Globally unique, stable across runs for the same document+position.
    pub chunk_id: String,
    pub document_id: String,
    /// Zero-based position within the document.
    pub position: usize,
    pub text: String,
}

/// RAG-ready view of an extracted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagDocument {
    pub document_id: String,
    /// Detected document type (filename patterns first, then content).
    pub detected_type: Option<String>,
    /// Confidence of the type detection, in [0, 1].
    pub type_confidence: f64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub chunks: Vec<ChunkRecord>,
}

/// Word/chunk/quality statistics emitted by LOAD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStats {
    pub word_count: usize,
    pub chunk_count: usize,
    pub extraction_quality: f64,
}

/// Canonical artifact written by the LOAD stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadArtifact {
    pub document_id: String,
    pub original_filename: String,
    /// Unified plain-text content.
    pub content: String,
    pub structure: DocumentStructure,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub extraction_method: String,
    /// Quality score in [0, 1]; 0 when extraction failed entirely.
    pub extraction_quality: f64,
    /// PDF heuristic: total text under 100 chars across at least one page.
    #[serde(default)]
    pub needs_ocr: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
    pub rag_document: RagDocument,
    pub stats: LoadStats,
    pub loaded_at: DateTime<Utc>,
}

/// Per-section record carried in the CLEAN artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanSectionRecord {
    pub kind: String,
    pub spm_category: Option<String>,
    pub original_text: String,
    pub cleaned_text: String,
    pub order: usize,
}

/// Artifact record for the CLEAN stage, carried in the batch summary
/// alongside the plain-text file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanArtifact {
    pub document_id: String,
    pub document_type: String,
    pub pipeline_filename: String,
    pub original_length: usize,
    pub cleaned_length: usize,
    pub section_count: usize,
    /// Count of sections per kind (header/body/table/formula/footer).
    pub section_kinds: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spm_components: Option<serde_json::Value>,
    pub cleaned_at: DateTime<Utc>,
}

/// Artifact produced by the PROCESS stage.
///
/// `structured` either conforms to the registered schema or is the
/// `{"raw_text": ...}` fallback; consumers tolerate both shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessArtifact {
    pub document_id: String,
    pub document_type: String,
    pub model: String,
    pub structured: serde_json::Value,
    pub content_length: usize,
    pub processed_at: DateTime<Utc>,
}
