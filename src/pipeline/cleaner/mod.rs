//! Document cleaner - CLEAN stage.
//!
//! Turns raw extracted content into coherent, noise-reduced text: identifies
//! the section structure, applies prioritized cleaning rules per section,
//! reconstructs the document, and optionally extracts schema-guided SPM
//! components.

pub mod rules;
pub mod sections;
pub mod spm;

use std::path::Path;

use chrono::Utc;
use tracing::{error, info, warn};

use super::{PipelineError, Result, StageContext, StageOutcome};
use crate::llm::LlmClient;
use crate::models::{CleanArtifact, CleanSectionRecord, Document, PipelineStage, Section, StageStatus};

use rules::{clean_tree, compile_rules, reconstruct, CompiledRule};
use sections::{identify_sections, SectionPatterns};

/// Result of cleaning one document.
pub struct CleanResult {
    pub content: String,
    pub original_length: usize,
    pub section_count: usize,
    pub section_kinds: serde_json::Map<String, serde_json::Value>,
    pub section_records: Vec<CleanSectionRecord>,
    pub spm_components: Option<serde_json::Value>,
}

/// CLEAN stage driver.
pub struct DocumentCleaner {
    ctx: StageContext,
    llm: Option<LlmClient>,
}

impl DocumentCleaner {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx, llm: None }
    }

    /// Provide an LLM client, enabling AI-guided cleaning when settings
    /// allow it.
    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Clean documents whose LOAD stage completed.
    pub async fn clean_documents(
        &self,
        limit: Option<usize>,
        use_ai: bool,
    ) -> Result<StageOutcome> {
        let store = self.ctx.store();
        let limit = limit.unwrap_or_else(|| store.get_setting_usize("batch.size", 500));

        let documents = store.documents_ready(PipelineStage::Clean, limit, false)?;
        if documents.is_empty() {
            warn!("No documents ready for cleaning");
            return Ok(StageOutcome::default());
        }

        // The CLI flag requests AI cleaning; settings can veto it.
        let use_ai = use_ai && store.get_setting_bool("document_cleaner.use_ai", false);
        let min_chars_for_ai =
            store.get_setting_usize("document_cleaner.min_chars_for_ai", 1000);

        let batch_name = format!("clean_batch_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let batch_id =
            store.create_batch(&batch_name, documents.len() as u64, PipelineStage::Clean)?;

        let patterns = SectionPatterns::new();
        let compiled = compile_rules(store.get_cleaning_rules()?);

        let mut cleaned = Vec::new();
        let mut failures = 0usize;

        for doc in &documents {
            info!("🔍 Cleaning document {}", doc.id);
            match self
                .clean_one(doc, &batch_id, &patterns, &compiled, use_ai, min_chars_for_ai)
                .await
            {
                Ok(record) => {
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Clean,
                        StageStatus::Completed,
                        &batch_id,
                        doc.document_type_id,
                        None,
                    )?;
                    cleaned.push(record);
                }
                Err(e) => {
                    error!("❌ Failed to clean document {}: {e}", doc.id);
                    failures += 1;
                    store.upsert_pipeline(
                        &doc.id,
                        PipelineStage::Clean,
                        StageStatus::Failed,
                        &batch_id,
                        doc.document_type_id,
                        Some(&e.to_string()),
                    )?;
                }
            }
        }

        if !cleaned.is_empty() {
            self.ctx.save_batch_summary(&batch_name, &cleaned)?;
        }
        self.ctx
            .finalize_batch_from_counts(&batch_id, cleaned.len(), documents.len())?;
        info!(
            "✅ Cleaning complete: {} success, {} failed",
            cleaned.len(),
            failures
        );

        Ok(StageOutcome {
            batch_id: Some(batch_id),
            total: documents.len(),
            succeeded: cleaned.len(),
            failed: failures,
        })
    }

    async fn clean_one(
        &self,
        doc: &Document,
        batch_id: &str,
        patterns: &SectionPatterns,
        compiled: &[CompiledRule],
        use_ai: bool,
        min_chars_for_ai: usize,
    ) -> Result<CleanArtifact> {
        let store = self.ctx.store();
        let document_type = store
            .get_document_type(&doc.id)?
            .unwrap_or_else(|| "comp_plan".to_string());

        let content = self
            .find_content(&doc.id)
            .ok_or(PipelineError::NoContent)?;

        store.upsert_pipeline(
            &doc.id,
            PipelineStage::Clean,
            StageStatus::Processing,
            batch_id,
            doc.document_type_id,
            None,
        )?;

        let schema = store.get_schema(&document_type)?;
        let ai_applicable = use_ai && content.len() >= min_chars_for_ai && self.llm.is_some();

        let (cleaned_content, result) = if ai_applicable {
            match self.ai_clean(&content, &document_type).await {
                Ok(ai_cleaned) => {
                    info!(
                        "🧠 Used AI cleaning for document {} ({} chars)",
                        doc.id,
                        content.len()
                    );
                    (ai_cleaned, None)
                }
                Err(e) => {
                    warn!("AI cleaning failed: {e}. Falling back to rule-based cleaning.");
                    let result = clean_document(&content, patterns, compiled, schema.as_ref());
                    (result.content.clone(), Some(result))
                }
            }
        } else {
            let result = clean_document(&content, patterns, compiled, schema.as_ref());
            (result.content.clone(), Some(result))
        };

        let filename = self
            .ctx
            .stage_filename(&doc.name, &doc.id, batch_id, Some(".txt"));
        let clean_path = self.ctx.dirs().stage_clean.join(&filename);
        std::fs::write(&clean_path, &cleaned_content)?;

        let mut patch = serde_json::Map::new();
        patch.insert("cleaned_length".into(), cleaned_content.len().into());
        patch.insert("clean_filename".into(), filename.clone().into());

        let (section_count, section_kinds, spm_components) = match &result {
            Some(result) => {
                store.save_sections(&doc.id, &result.section_records)?;
                if let Some(components) = &result.spm_components {
                    patch.insert("spm_components".into(), components.clone());
                }
                patch.insert("section_count".into(), result.section_count.into());
                (
                    result.section_count,
                    result.section_kinds.clone(),
                    result.spm_components.clone(),
                )
            }
            None => (0, serde_json::Map::new(), None),
        };
        store.update_document_metadata(&doc.id, &patch)?;

        info!(
            "✅ Document {} cleaned ({} chars)",
            doc.id,
            cleaned_content.len()
        );

        Ok(CleanArtifact {
            document_id: doc.id.clone(),
            document_type,
            pipeline_filename: filename,
            original_length: content.len(),
            cleaned_length: cleaned_content.len(),
            section_count,
            section_kinds,
            spm_components,
            cleaned_at: Utc::now(),
        })
    }

    /// Locate the LOAD artifact for a document and pull its raw text,
    /// unwrapping nested JSON content.
    fn find_content(&self, document_id: &str) -> Option<String> {
        let path = StageContext::find_document_file(&self.ctx.dirs().stage_load, document_id)?;
        read_content(&path)
    }

    async fn ai_clean(&self, content: &str, document_type: &str) -> Result<String> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| PipelineError::Config("AI cleaning requires an LLM client".into()))?;
        let system = "You are a document cleaning assistant. Remove boilerplate, page \
                      numbers and formatting noise while preserving all substantive \
                      content, tables and formulas. Return only the cleaned text.";
        let prompt = format!(
            "Clean the following {document_type} document:\n\n{content}"
        );
        let cleaned = llm.complete(system, &prompt).await?;
        if cleaned.trim().is_empty() {
            return Err(PipelineError::Config("empty AI cleaning response".into()));
        }
        Ok(cleaned)
    }
}

/// Read artifact content from disk, unwrapping JSON `content` fields.
fn read_content(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    if path.extension().map(|e| e == "json").unwrap_or(false) {
        Some(unwrap_nested_content(&raw))
    } else {
        Some(raw)
    }
}

/// Unwrap a JSON artifact's `content` field.
///
/// When `content` is itself a JSON string containing another `content`
/// field, the innermost value wins. Recursion is bounded to one unwrap
/// level.
pub fn unwrap_nested_content(raw: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return raw.to_string();
    };
    let Some(content) = value.get("content") else {
        return raw.to_string();
    };
    let Some(content_str) = content.as_str() else {
        return content.to_string();
    };

    if content_str.trim_start().starts_with('{') {
        if let Ok(nested) = serde_json::from_str::<serde_json::Value>(content_str) {
            if let Some(inner) = nested.get("content").and_then(|v| v.as_str()) {
                return inner.to_string();
            }
        }
    }
    content_str.to_string()
}

/// Clean a document's content with rule-based processing.
///
/// Deterministic for a fixed rule set and input: same sections, same rule
/// order, byte-identical output.
pub fn clean_document(
    content: &str,
    patterns: &SectionPatterns,
    compiled: &[CompiledRule],
    schema: Option<&serde_json::Value>,
) -> CleanResult {
    let mut sections = identify_sections(content, patterns);
    for section in &mut sections {
        clean_tree(section, compiled);
    }

    let cleaned_content = reconstruct(&sections);

    let mut section_kinds = serde_json::Map::new();
    let mut section_records = Vec::new();
    collect_records(&sections, &mut section_kinds, &mut section_records);

    let spm_components = schema
        .map(|schema| spm::extract_spm_components(&sections, schema))
        .filter(|v| v.as_object().map(|o| !o.is_empty()).unwrap_or(false));

    CleanResult {
        original_length: content.len(),
        section_count: sections.iter().map(Section::subtree_len).sum(),
        content: cleaned_content,
        section_kinds,
        section_records,
        spm_components,
    }
}

fn collect_records(
    sections: &[Section],
    kinds: &mut serde_json::Map<String, serde_json::Value>,
    records: &mut Vec<CleanSectionRecord>,
) {
    for section in sections {
        let counter = kinds
            .entry(section.kind.as_str().to_string())
            .or_insert(serde_json::Value::from(0u64));
        if let Some(n) = counter.as_u64() {
            *counter = serde_json::Value::from(n + 1);
        }
        records.push(CleanSectionRecord {
            kind: section.kind.as_str().to_string(),
            spm_category: section.spm_category.map(|c| c.as_str().to_string()),
            original_text: section.text.clone(),
            cleaned_text: section.cleaned.clone().unwrap_or_default(),
            order: records.len(),
        });
        collect_records(&section.children, kinds, records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_content_unwraps_two_levels() {
        let inner = r#"{"content": "the real text"}"#;
        let outer = serde_json::json!({ "content": inner }).to_string();
        assert_eq!(unwrap_nested_content(&outer), "the real text");
    }

    #[test]
    fn single_level_content_is_returned() {
        let raw = r#"{"content": "plain text", "extra": 1}"#;
        assert_eq!(unwrap_nested_content(raw), "plain text");
    }

    #[test]
    fn non_json_passes_through() {
        assert_eq!(unwrap_nested_content("just text"), "just text");
    }

    #[test]
    fn page_number_only_document_cleans_to_empty() {
        let patterns = SectionPatterns::new();
        let compiled = compile_rules(vec![]);
        let result = clean_document("42\n", &patterns, &compiled, None);
        assert_eq!(result.content, "");
        assert_eq!(result.section_count, 1);
    }

    #[test]
    fn clean_document_is_byte_deterministic() {
        let patterns = SectionPatterns::new();
        let compiled = compile_rules(vec![]);
        let content = "PLAN OVERVIEW\nSome   body text.\n\n| a | b |\n| 1 | 2 |\n7\n";
        let first = clean_document(content, &patterns, &compiled, None);
        let second = clean_document(content, &patterns, &compiled, None);
        assert_eq!(first.content, second.content);
        assert_eq!(first.section_count, second.section_count);
    }
}
