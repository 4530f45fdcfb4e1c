//! Document loader - LOAD stage.
//!
//! Produces a canonical artifact per document: extracted text with structure
//! preserved, document metadata, retrieval-ready chunks and quality
//! indicators. Format detection looks at what the file actually is, not just
//! its extension.

pub mod detect;
pub mod extract;
mod ooxml;
mod pdf;

pub use extract::{Extraction, ExtractionError};

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use super::{Result, StageContext, StageOutcome};
use crate::models::{Document, LoadArtifact, LoadStats, PipelineStage, RagDocument, StageStatus};
use crate::rag::chunk_text;

use detect::{detect_format, DetectedFormat};

/// Serialization format for the LOAD artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Self::Json),
            "text" => Some(Self::Text),
            "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Json => ".json",
            Self::Text => ".txt",
            Self::Markdown => ".md",
        }
    }
}

#[derive(Debug, Serialize)]
struct LoadedDocument {
    id: String,
    name: String,
    pipeline_filename: String,
    extraction_method: String,
    extraction_quality: f64,
    content_length: usize,
    chunk_count: usize,
    status: String,
}

/// LOAD stage driver.
pub struct DocumentLoader {
    ctx: StageContext,
}

impl DocumentLoader {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Load documents whose INPUT stage completed.
    ///
    /// `limit` overrides the `batch.size` setting (default 500);
    /// `retry_failed` re-admits documents with a failed LOAD record.
    pub fn load_documents(
        &self,
        limit: Option<usize>,
        format: OutputFormat,
        retry_failed: bool,
    ) -> Result<StageOutcome> {
        let store = self.ctx.store();
        let limit = limit.unwrap_or_else(|| store.get_setting_usize("batch.size", 500));

        let documents = store.documents_ready(PipelineStage::Load, limit, retry_failed)?;
        if documents.is_empty() {
            return Ok(StageOutcome::default());
        }

        let batch_name = format!("load_batch_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let batch_id =
            store.create_batch(&batch_name, documents.len() as u64, PipelineStage::Load)?;

        let mut loaded = Vec::new();
        let mut failed = 0usize;

        for doc in &documents {
            store.upsert_pipeline(
                &doc.id,
                PipelineStage::Load,
                StageStatus::Processing,
                &batch_id,
                doc.document_type_id,
                None,
            )?;
            match self.load_one(doc, &batch_id, format) {
                Ok(record) => {
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Load,
                        StageStatus::Completed,
                        &batch_id,
                        doc.document_type_id,
                        None,
                    )?;
                    loaded.push(record);
                }
                Err(e) => {
                    error!("❌ Failed to load document {}: {e}", doc.id);
                    failed += 1;
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Load,
                        StageStatus::Failed,
                        &batch_id,
                        doc.document_type_id,
                        Some(&e.to_string()),
                    )?;
                }
            }
        }

        if !loaded.is_empty() {
            self.ctx.save_batch_summary(&batch_name, &loaded)?;
        }
        self.ctx
            .finalize_batch_from_counts(&batch_id, loaded.len(), documents.len())?;
        info!(
            "Load complete: {} success, {} failed",
            loaded.len(),
            failed
        );

        Ok(StageOutcome {
            batch_id: Some(batch_id),
            total: documents.len(),
            succeeded: loaded.len(),
            failed,
        })
    }

    fn load_one(
        &self,
        doc: &Document,
        batch_id: &str,
        format: OutputFormat,
    ) -> Result<LoadedDocument> {
        let source = self
            .locate_source(doc)
            .ok_or(super::PipelineError::NoContent)?;

        let detected = detect_format(&source, &doc.file_type);
        if matches!(
            detected,
            DetectedFormat::Pdf
                | DetectedFormat::ConvertedPresentation
                | DetectedFormat::ConvertedSpreadsheet
        ) && !pdf::tools_available()
        {
            return Err(super::PipelineError::Extraction(
                ExtractionError::ToolNotFound("pdftotext/pdfinfo".to_string()),
            ));
        }
        let extraction = match extract::extract(&source, &detected) {
            Ok(extraction) => extraction,
            Err(e) => {
                // Captured in the artifact; the document still advances when
                // any text was produced.
                warn!("Extraction error for {}: {e}", doc.id);
                Extraction {
                    content: String::new(),
                    extraction_method: "failed".to_string(),
                    extraction_quality: 0.0,
                    metadata: {
                        let mut m = serde_json::Map::new();
                        m.insert("extraction_error".into(), e.to_string().into());
                        m
                    },
                    ..Default::default()
                }
            }
        };

        let extraction_error = extraction
            .metadata
            .get("extraction_error")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if extraction.content.trim().is_empty() && extraction_error.is_some() {
            return Err(super::PipelineError::Extraction(
                ExtractionError::ExtractionFailed(
                    extraction_error.unwrap_or_else(|| "no text produced".to_string()),
                ),
            ));
        }

        let (detected_type, type_confidence) =
            detect_document_type(&doc.original_filename, &extraction.content);

        let chunks = chunk_text(&extraction.content, &doc.id);
        let stats = LoadStats {
            word_count: extraction.content.split_whitespace().count(),
            chunk_count: chunks.len(),
            extraction_quality: extraction.extraction_quality,
        };

        let content_hash = hex::encode(Sha256::digest(extraction.content.as_bytes()));

        let mut rag_metadata = serde_json::Map::new();
        rag_metadata.insert("detected_format".into(), detected.as_str().into());
        rag_metadata.insert("content_hash".into(), content_hash.clone().into());
        rag_metadata.insert("file_type".into(), doc.file_type.clone().into());
        rag_metadata.insert(
            "original_filename".into(),
            doc.original_filename.clone().into(),
        );

        let artifact = LoadArtifact {
            document_id: doc.id.clone(),
            original_filename: doc.original_filename.clone(),
            content: extraction.content.clone(),
            structure: extraction.structure,
            metadata: extraction.metadata,
            extraction_method: extraction.extraction_method.clone(),
            extraction_quality: extraction.extraction_quality,
            needs_ocr: extraction.needs_ocr,
            extraction_error,
            rag_document: RagDocument {
                document_id: doc.id.clone(),
                detected_type: detected_type.clone(),
                type_confidence,
                metadata: rag_metadata,
                chunks,
            },
            stats: stats.clone(),
            loaded_at: Utc::now(),
        };

        let filename =
            self.ctx
                .stage_filename(&doc.name, &doc.id, batch_id, Some(format.extension()));
        let artifact_path = self.ctx.dirs().stage_load.join(&filename);
        self.write_artifact(&artifact_path, &artifact, format)?;

        // Keep a backup of the source next to the artifact when the name
        // changed during registration.
        if doc.name != doc.original_filename {
            let backup = self
                .ctx
                .dirs()
                .stage_load
                .join(format!("original_{}", doc.original_filename));
            if !backup.exists() {
                std::fs::copy(&source, &backup)?;
            }
        }

        let mut patch = serde_json::Map::new();
        patch.insert("extraction_method".into(), extraction.extraction_method.clone().into());
        patch.insert("extraction_quality".into(), extraction.extraction_quality.into());
        patch.insert("needs_ocr".into(), extraction.needs_ocr.into());
        patch.insert("detected_format".into(), detected.as_str().into());
        patch.insert("content_hash".into(), content_hash.into());
        patch.insert("word_count".into(), stats.word_count.into());
        patch.insert("chunk_count".into(), stats.chunk_count.into());
        if let Some(t) = &detected_type {
            patch.insert("detected_type".into(), t.clone().into());
            patch.insert("type_confidence".into(), type_confidence.into());
        }
        patch.insert("load_filename".into(), filename.clone().into());
        self.ctx.store().update_document_metadata(&doc.id, &patch)?;

        Ok(LoadedDocument {
            id: doc.id.clone(),
            name: doc.name.clone(),
            pipeline_filename: filename,
            extraction_method: extraction.extraction_method,
            extraction_quality: extraction.extraction_quality,
            content_length: artifact.content.len(),
            chunk_count: stats.chunk_count,
            status: "completed".to_string(),
        })
    }

    /// Locate the source file for a document.
    ///
    /// Checked in order: `stage_input/` by sanitized name, then the legacy
    /// `input/` directory, `unprocessed/`, `stage_load/`, the
    /// `stage_load/original_<name>` backup, and finally any file in those
    /// directories carrying the document's short id.
    fn locate_source(&self, doc: &Document) -> Option<PathBuf> {
        let dirs = self.ctx.dirs();
        let named_candidates = [
            dirs.stage_input.join(&doc.name),
            dirs.input.join(&doc.name),
            dirs.input.join(&doc.original_filename),
            dirs.unprocessed.join(&doc.name),
            dirs.unprocessed.join(&doc.original_filename),
            dirs.stage_load.join(&doc.name),
            dirs.stage_load
                .join(format!("original_{}", doc.original_filename)),
        ];
        for candidate in named_candidates {
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        for dir in [&dirs.stage_input, &dirs.input, &dirs.unprocessed, &dirs.stage_load] {
            if let Some(found) = StageContext::find_document_file(dir, &doc.id) {
                return Some(found);
            }
        }
        None
    }

    fn write_artifact(
        &self,
        path: &Path,
        artifact: &LoadArtifact,
        format: OutputFormat,
    ) -> Result<()> {
        match format {
            OutputFormat::Json => {
                serde_json::to_writer_pretty(std::fs::File::create(path)?, artifact)?;
            }
            OutputFormat::Text => {
                std::fs::write(path, &artifact.content)?;
            }
            OutputFormat::Markdown => {
                let body = format!(
                    "# {}\n\n{}\n",
                    artifact.original_filename, artifact.content
                );
                std::fs::write(path, body)?;
            }
        }
        Ok(())
    }
}

/// Patterns in filenames that identify a compensation plan.
const COMP_PLAN_NAME_HINTS: [&str; 5] = [
    "comp_plan",
    "comp-plan",
    "compensation",
    "incentive",
    "commission",
];

/// Terms in content that identify a compensation plan.
const COMP_PLAN_CONTENT_HINTS: [&str; 6] = [
    "incentive",
    "commission",
    "quota",
    "payout",
    "attainment",
    "compensation",
];

/// Detect a document type from filename patterns first, then content
/// patterns, with a confidence in [0, 1].
pub fn detect_document_type(filename: &str, content: &str) -> (Option<String>, f64) {
    let lower_name = filename.to_lowercase();
    if lower_name.contains("comp_plan") || lower_name.contains("comp-plan") {
        return (Some("comp_plan".to_string()), 0.9);
    }
    if COMP_PLAN_NAME_HINTS.iter().any(|hint| lower_name.contains(hint)) {
        return (Some("comp_plan".to_string()), 0.7);
    }

    let lower_content = content.to_lowercase();
    let hits = COMP_PLAN_CONTENT_HINTS
        .iter()
        .filter(|term| lower_content.contains(*term))
        .count();
    if hits >= 3 {
        let confidence = (0.4 + 0.1 * hits as f64).min(0.9);
        return (Some("comp_plan".to_string()), confidence);
    }

    (None, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_detection_prefers_filename() {
        let (ty, conf) = detect_document_type("ACME_comp_plan_2024.pdf", "");
        assert_eq!(ty.as_deref(), Some("comp_plan"));
        assert!(conf >= 0.9);
    }

    #[test]
    fn type_detection_falls_back_to_content() {
        let content = "Quota attainment drives the incentive payout schedule.";
        let (ty, conf) = detect_document_type("scan0001.pdf", content);
        assert_eq!(ty.as_deref(), Some("comp_plan"));
        assert!(conf > 0.0 && conf < 0.9);
    }

    #[test]
    fn type_detection_unknown() {
        let (ty, conf) = detect_document_type("notes.txt", "meeting notes about lunch");
        assert_eq!(ty, None);
        assert_eq!(conf, 0.0);
    }
}
