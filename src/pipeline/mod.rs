//! Pipeline stage coordination.
//!
//! Stages never call each other in-process: each stage driver pulls ready
//! documents from the state store, transforms them, writes artifacts into its
//! stage directory, and records completion or failure. `StageContext` carries
//! everything a driver needs: directories, the filename convention, batch
//! lifecycle and reset/cleanup operations.

pub mod batch_manager;
pub mod cleaner;
pub mod loader;
pub mod processor;

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::models::{BatchStatus, PipelineStage};
use crate::repository::{RepositoryError, StateStore};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("State store error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No content found")]
    NoContent,
    #[error("cancelled")]
    Cancelled,
    #[error("Extraction error: {0}")]
    Extraction(#[from] loader::ExtractionError),
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),
    #[error("RAG error: {0}")]
    Rag(#[from] crate::rag::RagError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of one stage-driver run, used for logging and exit codes.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub batch_id: Option<String>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StageOutcome {
    /// All documents in the batch failed (operational failure, exit code 2).
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }
}

/// Fixed directory names relative to the data root.
#[derive(Debug, Clone)]
pub struct StageDirs {
    pub unprocessed: PathBuf,
    /// Legacy intake directory, checked as a source fallback.
    pub input: PathBuf,
    pub stage_input: PathBuf,
    pub stage_load: PathBuf,
    pub stage_clean: PathBuf,
    pub stage_process: PathBuf,
    pub archive: PathBuf,
    pub processed: PathBuf,
    pub knowledge: PathBuf,
    pub logs: PathBuf,
}

impl StageDirs {
    fn new(data_dir: &Path) -> Self {
        Self {
            unprocessed: data_dir.join("unprocessed"),
            input: data_dir.join("input"),
            stage_input: data_dir.join("stage_input"),
            stage_load: data_dir.join("stage_load"),
            stage_clean: data_dir.join("stage_clean"),
            stage_process: data_dir.join("stage_process"),
            archive: data_dir.join("archive"),
            processed: data_dir.join("processed"),
            knowledge: data_dir.join("knowledge"),
            logs: data_dir.join("logs"),
        }
    }

    fn all(&self) -> [&PathBuf; 10] {
        [
            &self.unprocessed,
            &self.input,
            &self.stage_input,
            &self.stage_load,
            &self.stage_clean,
            &self.stage_process,
            &self.archive,
            &self.processed,
            &self.knowledge,
            &self.logs,
        ]
    }

    /// Output directory for a stage's artifacts.
    pub fn for_stage(&self, stage: PipelineStage) -> &Path {
        match stage {
            PipelineStage::Input => &self.stage_input,
            PipelineStage::Load => &self.stage_load,
            PipelineStage::Clean => &self.stage_clean,
            PipelineStage::Process => &self.stage_process,
            // INDEX writes to the vector store, not a stage directory;
            // its incidental files land under processed/.
            PipelineStage::Index => &self.processed,
        }
    }
}

/// Shared context handed to every stage driver.
#[derive(Debug, Clone)]
pub struct StageContext {
    stage: PipelineStage,
    dirs: StageDirs,
    store: StateStore,
}

impl StageContext {
    /// Create a context for a stage, ensuring all directories exist.
    pub fn new(stage: PipelineStage, data_dir: &Path, store: StateStore) -> Result<Self> {
        let dirs = StageDirs::new(data_dir);
        for dir in dirs.all() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self { stage, dirs, store })
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn dirs(&self) -> &StageDirs {
        &self.dirs
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Output directory for this context's stage.
    pub fn output_dir(&self) -> &Path {
        self.dirs.for_stage(self.stage)
    }

    /// Generate the standardized artifact filename for this stage:
    /// `pipeline_<stage>_doc<12-hex>_batch<batch>_<base>_<YYYYMMDD_HHMMSS><ext>`.
    ///
    /// `extension` overrides the original file's extension when provided
    /// (with leading dot, e.g. `.json`).
    pub fn stage_filename(
        &self,
        original_filename: &str,
        document_id: &str,
        batch_id: &str,
        extension: Option<&str>,
    ) -> String {
        let path = Path::new(original_filename);
        let base = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = extension
            .map(str::to_string)
            .or_else(|| path.extension().map(|e| format!(".{}", e.to_string_lossy())))
            .unwrap_or_default();

        let base = sanitize_stem(&base);
        let doc_short = crate::models::short_id(document_id);
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");

        format!(
            "pipeline_{}_doc{}_batch{}_{}_{}{}",
            self.stage.as_str(),
            doc_short,
            batch_id,
            base,
            timestamp,
            ext
        )
    }

    /// Find an artifact for a document in a directory by its short id.
    pub fn find_document_file(dir: &Path, document_id: &str) -> Option<PathBuf> {
        let needle = format!("doc{}", crate::models::short_id(document_id));
        let entries = std::fs::read_dir(dir).ok()?;
        let mut matches: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .map(|n| n.to_string_lossy().contains(&needle))
                        .unwrap_or(false)
            })
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Reset a stage: delete its pipeline rows and its artifact files,
    /// scoped to a batch when provided. Predecessor stage data is untouched.
    pub fn reset(&self, stage: PipelineStage, batch_id: Option<&str>) -> Result<u64> {
        let rows = self.store.reset_stage(stage, batch_id)?;

        let stage_dir = self.dirs.for_stage(stage);
        if stage_dir.exists() && stage != PipelineStage::Index {
            let filter = batch_id.map(|b| format!("batch{b}"));
            for entry in std::fs::read_dir(stage_dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let matches = match &filter {
                    Some(needle) => name.contains(needle.as_str()),
                    None => true,
                };
                if matches {
                    std::fs::remove_file(&path)?;
                }
            }
        }

        if let Some(batch) = batch_id {
            if self.store.delete_batch_if_empty(batch)? {
                info!("Deleted batch: {}", batch);
            }
        }
        Ok(rows)
    }

    /// Finalize a batch from success/total counts:
    /// completed when all succeeded, partial when some did, failed otherwise.
    pub fn finalize_batch_from_counts(
        &self,
        batch_id: &str,
        success: usize,
        total: usize,
    ) -> Result<BatchStatus> {
        let status = if success == total && total > 0 {
            BatchStatus::Completed
        } else if success > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Failed
        };
        self.store.finalize_batch(batch_id, status)?;
        Ok(status)
    }

    /// Write the per-stage batch summary JSON under `processed/`.
    pub fn save_batch_summary<T: serde::Serialize>(
        &self,
        batch_name: &str,
        documents: &[T],
    ) -> Result<PathBuf> {
        let filename = format!("pipeline_{}_{}.json", self.stage.as_str(), batch_name);
        let path = self.dirs.processed.join(filename);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, documents)?;
        info!("Saved {} documents to {}", documents.len(), path.display());
        Ok(path)
    }
}

/// Sanitize a filename stem: spaces to underscores, keep word characters,
/// dashes and dots, collapse underscore runs, cap at 100 chars.
///
/// Idempotent: sanitizing a sanitized name is a no-op.
pub fn sanitize_stem(stem: &str) -> String {
    let replaced: String = stem
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !last_underscore {
                collapsed.push(c);
            }
            last_underscore = true;
        } else {
            collapsed.push(c);
            last_underscore = false;
        }
    }

    collapsed.chars().take(100).collect()
}

/// Sanitize a full filename, preserving the extension.
pub fn sanitize_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}{}", sanitize_stem(&stem), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_stem("Comp Plan (2024) v1"), "Comp_Plan_2024_v1");
        assert_eq!(sanitize_filename("a  b!!.pdf"), "a_b.pdf");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let names = ["Comp Plan (2024).pdf", "weird~~name___x.docx", "", "a.b.c"];
        for name in names {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once);
        }
    }

    #[test]
    fn sanitize_caps_stem_length() {
        let long = "a".repeat(250);
        assert_eq!(sanitize_stem(&long).len(), 100);
    }

    #[test]
    fn stage_filename_follows_convention() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("db.sqlite"));
        store.init().unwrap();
        let ctx = StageContext::new(PipelineStage::Load, dir.path(), store).unwrap();

        let name = ctx.stage_filename(
            "My Plan.pdf",
            "123e4567-e89b-12d3-a456-426614174000",
            "b42",
            Some(".json"),
        );
        assert!(name.starts_with("pipeline_load_doc123e4567e89b_batchb42_My_Plan_"));
        assert!(name.ends_with(".json"));
    }
}
