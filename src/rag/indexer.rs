//! RAG indexer - INDEX stage and retrieval-powered analysis.
//!
//! Pulls documents from completed CLEAN (or PROCESS) records, chunks, embeds
//! and inserts them into the vector store, then records `(document, index)`
//! completion and the `rag_data` marker. Also indexes framework knowledge
//! files and generates per-document insight reports.

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::llm::LlmClient;
use crate::models::{PipelineStage, StageStatus};
use crate::pipeline::cleaner::unwrap_nested_content;
use crate::pipeline::loader::detect::DetectedFormat;
use crate::pipeline::loader::extract;
use crate::pipeline::{PipelineError, Result, StageContext, StageOutcome};

use super::engine::{RagEngine, SearchMode};

/// INDEX stage driver and analysis frontend.
pub struct RagIndexer {
    ctx: StageContext,
    engine: RagEngine,
    llm: Option<LlmClient>,
}

impl RagIndexer {
    pub fn new(ctx: StageContext, engine: RagEngine) -> Self {
        Self {
            ctx,
            engine,
            llm: None,
        }
    }

    /// Provide an LLM client for answer synthesis in `analyze`.
    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn engine(&self) -> &RagEngine {
        &self.engine
    }

    /// Index documents whose `source` stage (CLEAN or PROCESS) completed.
    pub async fn index_pipeline_documents(
        &mut self,
        source: PipelineStage,
        limit: usize,
    ) -> Result<StageOutcome> {
        if !matches!(source, PipelineStage::Clean | PipelineStage::Process) {
            return Err(PipelineError::Config(format!(
                "unsupported source stage for indexing: {}",
                source.as_str()
            )));
        }

        let store = self.ctx.store();
        let documents = store.documents_for_stage(
            source,
            StageStatus::Completed,
            PipelineStage::Index,
            limit,
            false,
        )?;
        if documents.is_empty() {
            warn!("No documents found in {} stage", source.as_str());
            return Ok(StageOutcome::default());
        }

        let batch_name = format!("index_batch_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let batch_id =
            store.create_batch(&batch_name, documents.len() as u64, PipelineStage::Index)?;

        let source_dir = self.ctx.dirs().for_stage(source).to_path_buf();
        let mut succeeded = 0usize;

        for doc in &documents {
            let document_type = store
                .get_document_type(&doc.id)?
                .unwrap_or_else(|| "unknown".to_string());

            let content = StageContext::find_document_file(&source_dir, &doc.id)
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .map(|raw| unwrap_nested_content(&raw))
                .filter(|content| !content.trim().is_empty());

            let Some(content) = content else {
                warn!("File not found for document {}", doc.id);
                store.upsert_pipeline(
                    &doc.id,
                    PipelineStage::Index,
                    StageStatus::Failed,
                    &batch_id,
                    doc.document_type_id,
                    Some("No content found"),
                )?;
                continue;
            };

            let mut metadata = serde_json::Map::new();
            metadata.insert("document_type".into(), document_type.clone().into());
            metadata.insert("pipeline_stage".into(), source.as_str().into());
            metadata.insert("original_filename".into(), doc.name.clone().into());

            match self.engine.index_content(&content, &doc.id, &metadata).await {
                Ok(chunk_count) if chunk_count > 0 => {
                    store.mark_indexed(&doc.id, chunk_count)?;
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Index,
                        StageStatus::Completed,
                        &batch_id,
                        doc.document_type_id,
                        None,
                    )?;
                    info!("Indexed document {}: {} chunks", doc.id, chunk_count);
                    succeeded += 1;
                }
                Ok(_) => {
                    warn!("Failed to index document: {}", doc.id);
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Index,
                        StageStatus::Failed,
                        &batch_id,
                        doc.document_type_id,
                        Some("no chunks produced"),
                    )?;
                }
                Err(e) => {
                    error!("❌ Error indexing document {}: {e}", doc.id);
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Index,
                        StageStatus::Failed,
                        &batch_id,
                        doc.document_type_id,
                        Some(&e.to_string()),
                    )?;
                }
            }
        }

        self.ctx
            .finalize_batch_from_counts(&batch_id, succeeded, documents.len())?;
        info!(
            "Successfully indexed {} documents from {} stage",
            succeeded,
            source.as_str()
        );

        Ok(StageOutcome {
            batch_id: Some(batch_id),
            total: documents.len(),
            succeeded,
            failed: documents.len() - succeeded,
        })
    }

    /// Index framework knowledge files from the `knowledge/` directory.
    pub async fn index_framework_documents(
        &mut self,
        framework_type: Option<&str>,
    ) -> Result<usize> {
        let knowledge_dir = self.ctx.dirs().knowledge.clone();
        if !knowledge_dir.exists() {
            error!("Framework directory not found: {}", knowledge_dir.display());
            return Ok(0);
        }

        let mut files: Vec<_> = std::fs::read_dir(&knowledge_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                name.ends_with("_knowledge.json")
                    || (name.contains("_framework_v") && name.ends_with(".xlsx"))
            })
            .collect();
        files.sort();

        if let Some(filter) = framework_type {
            let filter = filter.to_lowercase();
            files.retain(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase().contains(&filter))
                    .unwrap_or(false)
            });
        }
        info!("Found {} framework files to index", files.len());

        let mut indexed = 0usize;
        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let framework_id = format!("framework_{stem}");

            let is_xlsx = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("xlsx"))
                .unwrap_or(false);
            let content = if is_xlsx {
                match extract::extract(&path, &DetectedFormat::Xlsx) {
                    Ok(extraction) => extraction.content,
                    Err(e) => {
                        error!("Error indexing framework {}: {e}", path.display());
                        continue;
                    }
                }
            } else {
                match std::fs::read_to_string(&path) {
                    Ok(raw) => unwrap_nested_content(&raw),
                    Err(e) => {
                        error!("Error indexing framework {}: {e}", path.display());
                        continue;
                    }
                }
            };

            let mut metadata = serde_json::Map::new();
            metadata.insert("document_type".into(), "framework".into());

            info!("Indexing framework: {}", path.display());
            match self
                .engine
                .index_content(&content, &framework_id, &metadata)
                .await
            {
                Ok(chunks) if chunks > 0 => {
                    info!("Indexed framework {}: {} chunks", framework_id, chunks);
                    indexed += 1;
                }
                Ok(_) => warn!("Failed to index framework: {}", path.display()),
                Err(e) => error!("Error indexing framework {}: {e}", path.display()),
            }
        }

        info!("Successfully indexed {} framework documents", indexed);
        Ok(indexed)
    }

    /// Generate retrieval-powered insights for a document and persist them
    /// under the document's `rag_analysis` metadata key.
    pub async fn analyze_document(
        &self,
        document_id: &str,
        queries: Option<Vec<String>>,
    ) -> Result<serde_json::Value> {
        let store = self.ctx.store();
        let doc_type = store.get_document_type(document_id)?;

        let queries = queries.unwrap_or_else(|| default_queries(doc_type.as_deref()));

        let mut insights = serde_json::Map::new();
        for query in &queries {
            info!("Analyzing document {} with query: '{}'", document_id, query);
            let hits = self
                .engine
                .query(query, 5, SearchMode::Hybrid, 0.5)
                .await?;

            let sources: Vec<serde_json::Value> = hits
                .iter()
                .take(3)
                .map(|hit| hit.id.clone().into())
                .collect();
            let answer = self.synthesize_answer(query, &hits).await;

            insights.insert(
                query.clone(),
                json!({ "answer": answer, "sources": sources }),
            );
        }

        let analysis = json!({
            "document_id": document_id,
            "document_type": doc_type,
            "analysis_time": Utc::now().to_rfc3339(),
            "insights": insights,
        });

        let mut patch = serde_json::Map::new();
        patch.insert("rag_analysis".into(), analysis.clone());
        store.update_document_metadata(document_id, &patch)?;
        info!(
            "Completed analysis for document {} with {} insights",
            document_id,
            queries.len()
        );

        Ok(analysis)
    }

    /// Answer synthesis: LLM over retrieved context when configured,
    /// otherwise the top chunk excerpt.
    async fn synthesize_answer(
        &self,
        query: &str,
        hits: &[super::engine::QueryHit],
    ) -> Option<String> {
        if hits.is_empty() {
            return None;
        }
        if let Some(llm) = &self.llm {
            let context: String = hits
                .iter()
                .take(3)
                .map(|hit| hit.text.as_str())
                .collect::<Vec<_>>()
                .join("\n---\n");
            let system = "You answer questions about sales compensation documents using \
                          only the provided context. Be concise.";
            let prompt = format!("Context:\n{context}\n\nQuestion: {query}");
            match llm.complete(system, &prompt).await {
                Ok(answer) => return Some(answer),
                Err(e) => warn!("Answer synthesis failed, using excerpt: {e}"),
            }
        }
        hits.first()
            .map(|hit| hit.text.chars().take(300).collect())
    }

    /// Index and database statistics for `rag stats`.
    pub fn stats(&self) -> Result<serde_json::Value> {
        let store = self.ctx.store();
        let (total, indexed) = store.indexing_progress()?;
        let by_type: serde_json::Map<String, serde_json::Value> = store
            .document_counts_by_type()?
            .into_iter()
            .map(|(name, count)| (name, count.into()))
            .collect();

        let progress = if total > 0 {
            (indexed as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };

        Ok(json!({
            "rag_engine": self.engine.store().stats(),
            "database": {
                "total_documents": total,
                "indexed_documents": indexed,
                "remaining_documents": total - indexed,
                "progress_percentage": progress,
                "document_types": by_type,
            }
        }))
    }
}

/// Default analytical queries by document type.
fn default_queries(doc_type: Option<&str>) -> Vec<String> {
    let comp_related = doc_type
        .map(|t| t.contains("comp") || t.contains("compensation"))
        .unwrap_or(false);
    if comp_related {
        vec![
            "What are the main compensation components in this document?".to_string(),
            "What is the bonus structure described in this document?".to_string(),
            "What are the key performance metrics mentioned?".to_string(),
            "Are there any special conditions or exceptions mentioned?".to_string(),
        ]
    } else {
        vec![
            "What are the key topics covered in this document?".to_string(),
            "What are the main findings or conclusions?".to_string(),
            "Summarize this document in 3-5 bullet points.".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queries_depend_on_type() {
        let comp = default_queries(Some("comp_plan"));
        assert_eq!(comp.len(), 4);
        assert!(comp[0].contains("compensation components"));

        let generic = default_queries(None);
        assert_eq!(generic.len(), 3);
    }
}
