//! Batch manager - INPUT stage.
//!
//! Brings external files across the pipeline boundary: registers documents
//! from `unprocessed/`, standardizes names, copies canonical files into
//! `stage_input/` with metadata sidecars, and creates the batch record the
//! rest of the pipeline coordinates on.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use super::{sanitize_stem, PipelineError, Result, StageContext};
use crate::models::{short_id, PipelineStage, StageStatus};

/// Options for the INPUT stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputOptions {
    /// Copy originals into `archive/` before removal.
    pub archive: bool,
    /// Remove originals from `unprocessed/` after registration.
    pub delete: bool,
}

/// Registration record for one processed file, used for the sidecar and the
/// batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredDocument {
    pub id: String,
    pub name: String,
    pub original_filename: String,
    pub file_size: u64,
    pub file_type: String,
    pub document_type: String,
    pub document_type_id: i64,
    pub batch_id: String,
    pub registration_time: String,
    pub processing_time_secs: f64,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    batch_id: String,
    batch_name: String,
    document_type: String,
    document_count: usize,
    created_at: String,
    status: String,
    file_types: BTreeMap<String, u64>,
    total_size_bytes: u64,
    success_count: usize,
}

/// INPUT stage driver.
pub struct BatchManager {
    ctx: StageContext,
}

impl BatchManager {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Register a batch of documents of the given type.
    ///
    /// Returns the batch id, or `None` when `unprocessed/` is empty or no
    /// document could be registered.
    pub fn process_batch(&self, doc_type: &str, options: InputOptions) -> Result<Option<String>> {
        let store = self.ctx.store();

        let doc_type_row = store
            .get_document_type_by_name(doc_type)?
            .ok_or_else(|| {
                PipelineError::Config(format!("document type '{doc_type}' does not exist"))
            })?;

        let dirs = self.ctx.dirs();
        let mut files: Vec<_> = std::fs::read_dir(&dirs.unprocessed)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        if files.is_empty() {
            info!("No documents found in unprocessed directory.");
            return Ok(None);
        }
        info!(
            "Found {} documents in: {}",
            files.len(),
            dirs.unprocessed.display()
        );

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let batch_name = format!("batch_{doc_type}_{timestamp}");
        let batch_id = store.create_batch(&batch_name, files.len() as u64, PipelineStage::Input)?;

        let mut registered = Vec::new();
        let mut file_types: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_size = 0u64;

        for file_path in &files {
            match self.process_single_document(
                file_path,
                &doc_type_row.name,
                doc_type_row.id,
                &batch_id,
                options,
            ) {
                Ok(doc) => {
                    total_size += doc.file_size;
                    *file_types.entry(doc.file_type.clone()).or_insert(0) += 1;
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Input,
                        StageStatus::Completed,
                        &batch_id,
                        doc_type_row.id,
                        None,
                    )?;
                    registered.push(doc);
                }
                Err(e) => {
                    error!("❌ Failed to process {}: {e}", file_path.display());
                }
            }
        }

        let success = registered.len();
        let status = self.ctx.finalize_batch_from_counts(&batch_id, success, files.len())?;

        let summary = BatchSummary {
            batch_id: batch_id.clone(),
            batch_name: batch_name.clone(),
            document_type: doc_type.to_string(),
            document_count: files.len(),
            created_at: Utc::now().to_rfc3339(),
            status: status.as_str().to_string(),
            file_types,
            total_size_bytes: total_size,
            success_count: success,
        };
        let summary_path = dirs.stage_input.join(format!("batch_summary_{batch_id}.json"));
        serde_json::to_writer_pretty(std::fs::File::create(&summary_path)?, &summary)?;

        if success > 0 {
            self.ctx.save_batch_summary(&batch_name, &registered)?;
            info!(
                "🎉 Successfully processed {} of {} documents of type '{}'",
                success,
                files.len(),
                doc_type
            );
            Ok(Some(batch_id))
        } else {
            warn!("No documents were successfully processed.");
            Ok(None)
        }
    }

    /// Register one file: sanitize, persist, copy to `stage_input/`, write
    /// the sidecar, and handle archive/delete options.
    fn process_single_document(
        &self,
        file_path: &Path,
        doc_type: &str,
        doc_type_id: i64,
        batch_id: &str,
        options: InputOptions,
    ) -> Result<RegisteredDocument> {
        let start = Instant::now();
        let dirs = self.ctx.dirs();

        let metadata = std::fs::metadata(file_path)?;
        let file_size = metadata.len();
        let original_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_type = file_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let document_id = uuid::Uuid::new_v4().to_string();

        let ext = if file_type.is_empty() {
            String::new()
        } else {
            format!(".{file_type}")
        };
        let clean_stem = Path::new(&original_name)
            .file_stem()
            .map(|s| sanitize_stem(&s.to_string_lossy()))
            .unwrap_or_default();
        let clean_name = if clean_stem.is_empty() {
            format!("doc_{}{}", short_id(&document_id), ext)
        } else {
            format!("{clean_stem}{ext}")
        };

        self.ctx.store().register_document(
            &document_id,
            &clean_name,
            &original_name,
            doc_type_id,
            batch_id,
            file_size,
            &file_type,
        )?;
        info!(
            "✅ Registered document {}: {} (originally {})",
            document_id, clean_name, original_name
        );

        let stage_path = dirs.stage_input.join(&clean_name);
        std::fs::copy(file_path, &stage_path)?;

        let registration_time = Utc::now().to_rfc3339();
        let doc = RegisteredDocument {
            id: document_id,
            name: clean_name.clone(),
            original_filename: original_name.clone(),
            file_size,
            file_type,
            document_type: doc_type.to_string(),
            document_type_id: doc_type_id,
            batch_id: batch_id.to_string(),
            registration_time,
            processing_time_secs: start.elapsed().as_secs_f64(),
            status: "completed".to_string(),
        };

        // Sidecar with registration info next to the canonical copy
        let stem = Path::new(&clean_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| clean_name.clone());
        let sidecar_path = dirs.stage_input.join(format!("{stem}.meta.json"));
        serde_json::to_writer_pretty(std::fs::File::create(&sidecar_path)?, &doc)?;

        if options.archive {
            let archive_path = dirs.archive.join(&original_name);
            std::fs::copy(file_path, &archive_path)?;
            info!("📦 Archived original file to: {}", archive_path.display());
        }
        if options.delete || options.archive {
            std::fs::remove_file(file_path)?;
        }

        Ok(doc)
    }
}
