//! Batch lifecycle operations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use super::{parse_datetime, parse_datetime_opt, Result, StageCounts, StateStore};
use crate::models::{Batch, BatchStatus, PipelineStage};

fn row_to_batch(row: &Row<'_>) -> rusqlite::Result<Batch> {
    let status_raw: String = row.get("status")?;
    let stage_raw: String = row.get("pipeline_stage")?;
    let created_at: String = row.get("created_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    Ok(Batch {
        id: row.get("batch_id")?,
        name: row.get("batch_name")?,
        document_count: row.get::<_, i64>("document_count")? as u64,
        status: BatchStatus::from_str(&status_raw).unwrap_or(BatchStatus::Failed),
        stage: PipelineStage::from_str(&stage_raw).unwrap_or(PipelineStage::Input),
        created_at: parse_datetime(&created_at),
        completed_at: parse_datetime_opt(completed_at),
    })
}

impl StateStore {
    /// Create a batch record with `processing` status, returning its id.
    pub fn create_batch(
        &self,
        name: &str,
        document_count: u64,
        stage: PipelineStage,
    ) -> Result<String> {
        let conn = self.connect()?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO processing_batches
             (batch_id, batch_name, document_count, status, pipeline_stage, created_at)
             VALUES (?1, ?2, ?3, 'processing', ?4, ?5)",
            params![
                id,
                name,
                document_count as i64,
                stage.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        info!("Created processing batch {} ({})", id, name);
        Ok(id)
    }

    /// Mark a batch finished with the given status.
    pub fn finalize_batch(&self, batch_id: &str, status: BatchStatus) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE processing_batches SET status = ?1, completed_at = ?2 WHERE batch_id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), batch_id],
        )?;
        info!("Batch {} finalized with status: {}", batch_id, status.as_str());
        Ok(())
    }

    /// Get a batch by id.
    pub fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM processing_batches WHERE batch_id = ?1")?;
        let batch = stmt.query_row(params![batch_id], row_to_batch).optional()?;
        Ok(batch)
    }

    /// Batches still in `processing` or `partial`, newest first.
    pub fn list_active_batches(&self) -> Result<Vec<Batch>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_batches
             WHERE status IN ('processing', 'partial')
             ORDER BY created_at DESC",
        )?;
        let batches = stmt
            .query_map([], row_to_batch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    /// Batch info plus per-stage status counts, for `batch status`.
    pub fn batch_status(&self, batch_id: &str) -> Result<Option<(Batch, StageCounts)>> {
        let Some(batch) = self.get_batch(batch_id)? else {
            return Ok(None);
        };
        let counts = self.stage_counts(Some(batch_id))?;
        Ok(Some((batch, counts)))
    }

    /// Delete a batch record if no documents reference it.
    pub fn delete_batch_if_empty(&self, batch_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let doc_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        if doc_count > 0 {
            return Ok(false);
        }
        conn.execute(
            "DELETE FROM processing_batches WHERE batch_id = ?1",
            params![batch_id],
        )?;
        Ok(true)
    }
}
