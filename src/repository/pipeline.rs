//! Pipeline-state record operations.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::{parse_datetime, Result, StateStore};
use crate::models::{Document, PipelineRecord, PipelineStage, StageStatus};

/// Per-stage status counts for a batch, keyed stage -> status -> count.
pub type StageCounts = BTreeMap<String, BTreeMap<String, u64>>;

impl StateStore {
    /// Insert or update the `(document, stage)` record.
    ///
    /// Idempotent: repeated calls update status/error/updated_at in place and
    /// never create duplicates.
    pub fn upsert_pipeline(
        &self,
        document_id: &str,
        stage: PipelineStage,
        status: StageStatus,
        batch_id: &str,
        document_type_id: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO processing_pipeline
             (document_id, pipeline_stage, status, error_message, batch_id, document_type_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(document_id, pipeline_stage) DO UPDATE
             SET status = excluded.status,
                 error_message = excluded.error_message,
                 updated_at = excluded.updated_at",
            params![
                document_id,
                stage.as_str(),
                status.as_str(),
                error_message,
                batch_id,
                document_type_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        debug!(
            "Pipeline status: {} | {} -> {}",
            document_id,
            stage.as_str(),
            status.as_str()
        );
        Ok(())
    }

    /// Fetch a single pipeline record.
    pub fn get_pipeline_record(
        &self,
        document_id: &str,
        stage: PipelineStage,
    ) -> Result<Option<PipelineRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT document_id, pipeline_stage, status, error_message,
                        batch_id, document_type_id, updated_at
                 FROM processing_pipeline
                 WHERE document_id = ?1 AND pipeline_stage = ?2",
                params![document_id, stage.as_str()],
                |row| {
                    let stage_raw: String = row.get(1)?;
                    let status_raw: String = row.get(2)?;
                    let updated_at: String = row.get(6)?;
                    Ok(PipelineRecord {
                        document_id: row.get(0)?,
                        stage: PipelineStage::from_str(&stage_raw)
                            .unwrap_or(PipelineStage::Input),
                        status: StageStatus::from_str(&status_raw)
                            .unwrap_or(StageStatus::Failed),
                        error_message: row.get(3)?,
                        batch_id: row.get(4)?,
                        document_type_id: row.get(5)?,
                        updated_at: parse_datetime(&updated_at),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Documents ready for a stage: predecessor completed, own stage not yet
    /// recorded (or recorded failed, with `retry_failed`), no INDEX record.
    ///
    /// Ordered by document insertion time for fairness, bounded by `limit`.
    pub fn documents_ready(
        &self,
        stage: PipelineStage,
        limit: usize,
        retry_failed: bool,
    ) -> Result<Vec<Document>> {
        let Some(previous) = stage.predecessor() else {
            return Ok(Vec::new());
        };
        self.documents_for_stage(previous, StageStatus::Completed, stage, limit, retry_failed)
    }

    /// Documents whose `(document, previous_stage)` record has the given
    /// status, excluding documents already recorded for `target_stage`
    /// (unless `retry_failed`, which re-admits failed target records) and
    /// documents that already hold an `index` record.
    pub fn documents_for_stage(
        &self,
        previous_stage: PipelineStage,
        status: StageStatus,
        target_stage: PipelineStage,
        limit: usize,
        retry_failed: bool,
    ) -> Result<Vec<Document>> {
        let conn = self.connect()?;
        let target_filter = if retry_failed {
            "NOT EXISTS (
                SELECT 1 FROM processing_pipeline own
                WHERE own.document_id = d.id
                  AND own.pipeline_stage = ?3
                  AND own.status != 'failed')"
        } else {
            "NOT EXISTS (
                SELECT 1 FROM processing_pipeline own
                WHERE own.document_id = d.id
                  AND own.pipeline_stage = ?3)"
        };
        let sql = format!(
            "SELECT d.* FROM documents d
             JOIN processing_pipeline pp
               ON pp.document_id = d.id AND pp.pipeline_stage = ?1
             WHERE pp.status = ?2
               AND {target_filter}
               AND NOT EXISTS (
                 SELECT 1 FROM processing_pipeline done
                 WHERE done.document_id = d.id
                   AND done.pipeline_stage = 'index'
                   AND done.pipeline_stage != ?3)
             ORDER BY d.created_at ASC
             LIMIT ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(
                params![
                    previous_stage.as_str(),
                    status.as_str(),
                    target_stage.as_str(),
                    limit as i64
                ],
                |row| {
                    let metadata_raw: String = row.get("metadata")?;
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
                        metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
                        created_at: parse_datetime(&created_at),
                        updated_at: parse_datetime(&updated_at),
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if docs.is_empty() {
            info!("No documents ready for stage: {}", target_stage.as_str());
        } else {
            info!(
                "Found {} documents ready for {} stage",
                docs.len(),
                target_stage.as_str()
            );
        }
        Ok(docs)
    }

    /// Delete pipeline rows for a stage, scoped to a batch when provided.
    pub fn reset_stage(&self, stage: PipelineStage, batch_id: Option<&str>) -> Result<u64> {
        let conn = self.connect()?;
        let deleted = match batch_id {
            Some(batch) => conn.execute(
                "DELETE FROM processing_pipeline WHERE pipeline_stage = ?1 AND batch_id = ?2",
                params![stage.as_str(), batch],
            )?,
            None => conn.execute(
                "DELETE FROM processing_pipeline WHERE pipeline_stage = ?1",
                params![stage.as_str()],
            )?,
        };
        info!(
            "Reset pipeline stage {} ({} rows)",
            stage.as_str(),
            deleted
        );
        Ok(deleted as u64)
    }

    /// Delete documents with no pipeline rows and batches with no documents.
    pub fn cleanup_orphans(&self) -> Result<(u64, u64)> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let docs = tx.execute(
            "DELETE FROM documents
             WHERE NOT EXISTS (
                 SELECT 1 FROM processing_pipeline p WHERE p.document_id = documents.id)",
            [],
        )?;
        let batches = tx.execute(
            "DELETE FROM processing_batches
             WHERE NOT EXISTS (
                 SELECT 1 FROM documents d WHERE d.batch_id = processing_batches.batch_id)",
            [],
        )?;
        tx.commit()?;
        if docs > 0 || batches > 0 {
            info!(
                "Cleaned up {} orphaned documents, {} orphaned batches",
                docs, batches
            );
        }
        Ok((docs as u64, batches as u64))
    }

    /// Stages recorded `completed` for a document, in pipeline order.
    pub fn completed_stages(&self, document_id: &str) -> Result<Vec<PipelineStage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT pipeline_stage FROM processing_pipeline
             WHERE document_id = ?1 AND status = 'completed'",
        )?;
        let mut stages: Vec<PipelineStage> = stmt
            .query_map(params![document_id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| PipelineStage::from_str(&s))
            .collect();
        stages.sort_by_key(|s| PipelineStage::ALL.iter().position(|x| x == s));
        Ok(stages)
    }

    /// Per-stage status counts, optionally scoped to a batch.
    pub fn stage_counts(&self, batch_id: Option<&str>) -> Result<StageCounts> {
        let conn = self.connect()?;
        let (sql, params_vec): (&str, Vec<&str>) = match batch_id {
            Some(batch) => (
                "SELECT pipeline_stage, status, COUNT(*) FROM processing_pipeline
                 WHERE batch_id = ?1
                 GROUP BY pipeline_stage, status ORDER BY pipeline_stage, status",
                vec![batch],
            ),
            None => (
                "SELECT pipeline_stage, status, COUNT(*) FROM processing_pipeline
                 GROUP BY pipeline_stage, status ORDER BY pipeline_stage, status",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as u64,
            ))
        })?;

        let mut counts: StageCounts = BTreeMap::new();
        for row in rows {
            let (stage, status, count) = row?;
            counts.entry(stage).or_default().insert(status, count);
        }
        Ok(counts)
    }
}
