//! Document processor - PROCESS stage.
//!
//! Drives one LLM call per document, parameterized by the document type's
//! prompt and schema, and persists the structured result. Documents are
//! grouped into small API sub-batches with a pause between documents to
//! smooth bursts; the client enforces the global rate-limit floor on top.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use super::cleaner::unwrap_nested_content;
use super::{PipelineError, Result, StageContext, StageOutcome};
use crate::llm::LlmClient;
use crate::models::{Document, PipelineStage, ProcessArtifact, StageStatus};

/// Fallback prompt when a document type has none registered.
const GENERIC_PROMPT: &str =
    "Extract structured data from this document. Extract only factual information \
     from the document.";

/// Pause between documents within one API sub-batch.
const INTRA_BATCH_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct ProcessedDocument {
    id: String,
    name: String,
    pipeline_filename: String,
    document_type: String,
    content_length: usize,
    status: String,
}

/// PROCESS stage driver.
pub struct DocumentProcessor {
    ctx: StageContext,
    llm: LlmClient,
}

impl DocumentProcessor {
    pub fn new(ctx: StageContext, llm: LlmClient) -> Self {
        Self { ctx, llm }
    }

    /// Process documents whose CLEAN stage completed.
    ///
    /// `batch_size` is the API sub-batch size (default 2), distinct from the
    /// document `limit`.
    pub async fn process_documents(
        &self,
        limit: Option<usize>,
        batch_size: usize,
    ) -> Result<StageOutcome> {
        let store = self.ctx.store();
        // Smaller default than other stages: every document is an API call.
        let limit = limit.unwrap_or_else(|| store.get_setting_usize("batch.size", 10));
        let batch_size = batch_size.max(1);

        let documents = store.documents_ready(PipelineStage::Process, limit, false)?;
        if documents.is_empty() {
            warn!("No documents found ready for processing");
            return Ok(StageOutcome::default());
        }

        info!(
            "🚀 Starting document processor with model={}, batch_size={}",
            self.llm.config().model,
            batch_size
        );

        let batch_name = format!("process_batch_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let batch_id =
            store.create_batch(&batch_name, documents.len() as u64, PipelineStage::Process)?;

        let mut processed = Vec::new();
        let total = documents.len();

        // Ctrl-C marks the in-flight document `failed("cancelled")` and
        // stops pulling further work instead of completing it.
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut cancelled = false;

        'batches: for (chunk_index, chunk) in documents.chunks(batch_size).enumerate() {
            info!(
                "⚙️ Processing batch {}/{} ({} documents)",
                chunk_index + 1,
                total.div_ceil(batch_size),
                chunk.len()
            );
            for (i, doc) in chunk.iter().enumerate() {
                let result = tokio::select! {
                    result = self.process_one(doc, &batch_id) => result,
                    _ = &mut shutdown => {
                        cancelled = true;
                        Err(super::PipelineError::Cancelled)
                    }
                };
                match result {
                    Ok(record) => {
                        store.upsert_pipeline(
                            &doc.id,
                            PipelineStage::Process,
                            StageStatus::Completed,
                            &batch_id,
                            doc.document_type_id,
                            None,
                        )?;
                        processed.push(record);
                    }
                    Err(e) => {
                        error!("❌ Error processing document {}: {e}", doc.id);
                        store.upsert_pipeline(
                            &doc.id,
                            PipelineStage::Process,
                            StageStatus::Failed,
                            &batch_id,
                            doc.document_type_id,
                            Some(&e.to_string()),
                        )?;
                    }
                }
                if cancelled {
                    break 'batches;
                }
                if batch_size > 1 && i + 1 < chunk.len() {
                    tokio::time::sleep(INTRA_BATCH_PAUSE).await;
                }
            }
            info!(
                "📊 Progress: {}/{} documents processed successfully",
                processed.len(),
                total
            );
        }

        if !processed.is_empty() {
            self.ctx.save_batch_summary(&batch_name, &processed)?;
        }
        self.ctx
            .finalize_batch_from_counts(&batch_id, processed.len(), total)?;

        Ok(StageOutcome {
            batch_id: Some(batch_id),
            total,
            succeeded: processed.len(),
            failed: total - processed.len(),
        })
    }

    async fn process_one(&self, doc: &Document, batch_id: &str) -> Result<ProcessedDocument> {
        let store = self.ctx.store();
        let document_type = store
            .get_document_type(&doc.id)?
            .unwrap_or_else(|| "unknown".to_string());
        info!("🔍 Processing document {} of type {}", doc.id, document_type);

        store.upsert_pipeline(
            &doc.id,
            PipelineStage::Process,
            StageStatus::Processing,
            batch_id,
            doc.document_type_id,
            None,
        )?;

        let content = self
            .find_content(&doc.id)
            .filter(|c| !c.trim().is_empty())
            .ok_or(PipelineError::NoContent)?;

        let prompt = self.build_prompt(&document_type)?;
        let structured = self.llm.extract_structured(&prompt, &content).await?;

        let filename = self
            .ctx
            .stage_filename(&doc.name, &doc.id, batch_id, Some(".json"));
        let artifact = ProcessArtifact {
            document_id: doc.id.clone(),
            document_type: document_type.clone(),
            model: self.llm.config().model.clone(),
            structured: structured.clone(),
            content_length: content.len(),
            processed_at: Utc::now(),
        };
        let path = self.ctx.dirs().stage_process.join(&filename);
        serde_json::to_writer_pretty(std::fs::File::create(&path)?, &artifact)?;
        info!("✅ Saved processed data to {}", path.display());

        // Best-effort database persistence; a failure is surfaced as a
        // warning, the document still completes.
        if let Err(e) = store.save_processed_document(&structured, &doc.id) {
            warn!("⚠️ Failed to save processed data for document {}: {e}", doc.id);
        }

        let mut patch = serde_json::Map::new();
        patch.insert("process_filename".into(), filename.clone().into());
        patch.insert("processed_content_length".into(), content.len().into());
        store.update_document_metadata(&doc.id, &patch)?;

        Ok(ProcessedDocument {
            id: doc.id.clone(),
            name: doc.name.clone(),
            pipeline_filename: filename,
            document_type,
            content_length: content.len(),
            status: "completed".to_string(),
        })
    }

    /// Assemble the extraction prompt: the type's registered prompt (or the
    /// generic fallback), plus the schema instruction when one exists.
    fn build_prompt(&self, document_type: &str) -> Result<String> {
        let store = self.ctx.store();
        let mut prompt = match store.get_prompt(document_type)? {
            Some(custom) => {
                info!("✅ Using custom prompt for {}", document_type);
                custom
            }
            None => {
                info!(
                    "ℹ️ No custom prompt found for {}, using default",
                    document_type
                );
                GENERIC_PROMPT.to_string()
            }
        };

        match store.get_schema(document_type)? {
            Some(schema) => {
                let schema_json = serde_json::to_string_pretty(&schema)?;
                prompt.push_str(&format!(
                    "\n\nReturn your response in the following JSON schema:\n{schema_json}"
                ));
            }
            None => {
                warn!("⚠️ No schema found for document type: {}", document_type);
            }
        }
        Ok(prompt)
    }

    /// Fetch cleaned content from `stage_clean/`, unwrapping nested JSON.
    fn find_content(&self, document_id: &str) -> Option<String> {
        let path =
            StageContext::find_document_file(&self.ctx.dirs().stage_clean, document_id)?;
        let raw = std::fs::read_to_string(&path).ok()?;
        info!("✅ Found clean file: {}", path.display());
        Some(unwrap_nested_content(&raw))
    }
}
