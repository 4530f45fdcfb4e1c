//! Document, document-type and schema operations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use super::{parse_datetime, RepositoryError, Result, StateStore};
use crate::models::{Document, DocumentType};

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let metadata_raw: String = row.get("metadata")?;
    let metadata = serde_json::from_str(&metadata_raw).unwrap_or_default();
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Document {
        id: row.get("id")?,
        name: row.get("name")?,
        original_filename: row.get("original_filename")?,
        document_type_id: row.get("document_type_id")?,
        batch_id: row.get("batch_id")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        file_type: row.get("file_type")?,
        metadata,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

impl StateStore {
    /// Register a new document under the given id (callers generate a UUID
    /// up front so name fallbacks can reference it), returning the id.
    pub fn register_document(
        &self,
        id: &str,
        name: &str,
        original_filename: &str,
        document_type_id: i64,
        batch_id: &str,
        file_size: u64,
        file_type: &str,
    ) -> Result<String> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO documents
             (id, name, original_filename, document_type_id, batch_id,
              file_size, file_type, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '{}', ?8, ?8)",
            params![
                id,
                name,
                original_filename,
                document_type_id,
                batch_id,
                file_size as i64,
                file_type,
                now
            ],
        )?;
        debug!("Registered document {}: {}", id, name);
        Ok(id.to_string())
    }

    /// Get a document by id.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE id = ?1")?;
        let doc = stmt
            .query_row(params![id], row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// Merge a JSON patch into a document's metadata.
    ///
    /// Existing keys are overwritten by the patch; other keys are preserved.
    pub fn update_document_metadata(
        &self,
        id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT metadata FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| RepositoryError::NotFound(format!("document {id}")))?;

        let mut metadata: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&raw).unwrap_or_default();
        for (key, value) in patch {
            metadata.insert(key.clone(), value.clone());
        }

        conn.execute(
            "UPDATE documents SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&metadata)?,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    /// Look up a document type by name.
    pub fn get_document_type_by_name(&self, name: &str) -> Result<Option<DocumentType>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT id, name, ai_prompt FROM document_types WHERE name = ?1")?;
        let doc_type = stmt
            .query_row(params![name], |row| {
                Ok(DocumentType {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    ai_prompt: row.get(2)?,
                })
            })
            .optional()?;
        Ok(doc_type)
    }

    /// Look up the type name for a document, if any.
    pub fn get_document_type(&self, document_id: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT t.name FROM documents d
                 JOIN document_types t ON t.id = d.document_type_id
                 WHERE d.id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Create a document type, returning its id. No-op if it already exists.
    pub fn create_document_type(&self, name: &str, ai_prompt: Option<&str>) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO document_types (name, ai_prompt) VALUES (?1, ?2)",
            params![name, ai_prompt],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM document_types WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Fetch the prompt registered for a document type.
    pub fn get_prompt(&self, type_name: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let prompt: Option<Option<String>> = conn
            .query_row(
                "SELECT ai_prompt FROM document_types WHERE name = ?1",
                params![type_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(prompt.flatten())
    }

    /// Fetch the schema definition registered for a document type.
    pub fn get_schema(&self, type_name: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT schema_definition FROM document_schema WHERE document_type = ?1",
                params![type_name],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Register or replace the schema for a document type.
    pub fn put_schema(&self, type_name: &str, schema: &serde_json::Value) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO document_schema (document_type, schema_definition) VALUES (?1, ?2)
             ON CONFLICT(document_type) DO UPDATE SET schema_definition = excluded.schema_definition",
            params![type_name, serde_json::to_string(schema)?],
        )?;
        Ok(())
    }

    /// Persist the structured PROCESS output for a document.
    ///
    /// Best-effort: failures are surfaced as a warning by callers, never as a
    /// document failure.
    pub fn save_processed_document(
        &self,
        structured: &serde_json::Value,
        document_id: &str,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO processed_documents (document_id, structured, processed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(document_id) DO UPDATE
             SET structured = excluded.structured, processed_at = excluded.processed_at",
            params![
                document_id,
                serde_json::to_string(structured)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Replace the stored sections for a document.
    pub fn save_sections(
        &self,
        document_id: &str,
        sections: &[crate::models::CleanSectionRecord],
    ) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM document_sections WHERE document_id = ?1",
            params![document_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO document_sections
                 (document_id, section_type, content, cleaned_content, section_order, spm_category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for section in sections {
                stmt.execute(params![
                    document_id,
                    section.kind,
                    section.original_text,
                    section.cleaned_text,
                    section.order as i64,
                    section.spm_category
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record that a document has been indexed by the INDEX stage.
    pub fn mark_indexed(&self, document_id: &str, chunk_count: usize) -> Result<()> {
        let conn = self.connect()?;
        let rag_data = serde_json::json!({
            "indexed": true,
            "chunk_count": chunk_count,
            "indexed_at": Utc::now().to_rfc3339(),
        });
        let changed = conn.execute(
            "UPDATE documents SET rag_data = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&rag_data)?,
                Utc::now().to_rfc3339(),
                document_id
            ],
        )?;
        if changed == 0 {
            warn!("mark_indexed: document {} not found", document_id);
        }
        Ok(())
    }

    /// Count of documents with and without rag_data, for `rag stats`.
    pub fn indexing_progress(&self) -> Result<(u64, u64)> {
        let conn = self.connect()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let indexed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE rag_data IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok((total as u64, indexed as u64))
    }

    /// Document counts grouped by type name, for `rag stats`.
    pub fn document_counts_by_type(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT t.name, COUNT(*) FROM documents d
             JOIN document_types t ON t.id = d.document_type_id
             GROUP BY t.name ORDER BY t.name",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}
