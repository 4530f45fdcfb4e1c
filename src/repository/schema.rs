//! Database schema and default seeds.

use rusqlite::Connection;

use super::Result;

/// Create all tables and indexes. Every statement is idempotent.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS document_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            ai_prompt TEXT
        );

        CREATE TABLE IF NOT EXISTS document_schema (
            document_type TEXT PRIMARY KEY,
            schema_definition TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            document_type_id INTEGER NOT NULL REFERENCES document_types(id),
            batch_id TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            file_type TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}',
            rag_data TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_batch ON documents(batch_id);

        CREATE TABLE IF NOT EXISTS processing_batches (
            batch_id TEXT PRIMARY KEY,
            batch_name TEXT NOT NULL,
            document_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'processing',
            pipeline_stage TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS processing_pipeline (
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            pipeline_stage TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            batch_id TEXT NOT NULL,
            document_type_id INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (document_id, pipeline_stage)
        );
        CREATE INDEX IF NOT EXISTS idx_pipeline_stage_status
            ON processing_pipeline(pipeline_stage, status);
        CREATE INDEX IF NOT EXISTS idx_pipeline_batch ON processing_pipeline(batch_id);

        CREATE TABLE IF NOT EXISTS pipeline_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cleaning_patterns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT NOT NULL,
            replacement TEXT NOT NULL DEFAULT '',
            pattern_type TEXT NOT NULL DEFAULT 'regex',
            description TEXT,
            priority INTEGER NOT NULL DEFAULT 5,
            context TEXT NOT NULL DEFAULT 'all',
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS document_sections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            section_type TEXT NOT NULL,
            content TEXT NOT NULL,
            cleaned_content TEXT NOT NULL,
            section_order INTEGER NOT NULL DEFAULT 0,
            spm_category TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sections_document ON document_sections(document_id);

        CREATE TABLE IF NOT EXISTS processed_documents (
            document_id TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
            structured TEXT NOT NULL,
            processed_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Seed the default document type and the baseline cleaning rules.
///
/// Seeds only insert when the target table has no conflicting row, so
/// repeated init calls leave user edits alone.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT OR IGNORE INTO document_types (name, ai_prompt) VALUES ('comp_plan', NULL)",
        [],
    )?;

    let seeded: i64 =
        conn.query_row("SELECT COUNT(*) FROM cleaning_patterns", [], |row| row.get(0))?;
    if seeded == 0 {
        let defaults: &[(&str, &str, &str, &str, i64)] = &[
            (
                r"(Confidential|for Internal Use Only)",
                "",
                "regex",
                "Remove confidentiality markers",
                1,
            ),
            (
                r"^\s*\d+\s*$",
                "",
                "regex",
                "Remove standalone page numbers",
                2,
            ),
            (
                r"(Page\s*\d+\s*of\s*\d+)",
                "",
                "regex",
                "Remove page numbers",
                2,
            ),
            (r"\s{2,}", " ", "regex", "Normalize whitespace", 10),
        ];
        let mut stmt = conn.prepare(
            "INSERT INTO cleaning_patterns
             (pattern, replacement, pattern_type, description, priority, context, active, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, 'all', 1, ?6)",
        )?;
        for (order, (pattern, replacement, kind, description, priority)) in
            defaults.iter().enumerate()
        {
            stmt.execute(rusqlite::params![
                pattern,
                replacement,
                kind,
                description,
                priority,
                order as i64
            ])?;
        }
    }

    conn.execute(
        "INSERT OR IGNORE INTO pipeline_settings (key, value, description, updated_at)
         VALUES ('batch.size', '500', 'Maximum documents to process per pipeline stage', ?1)",
        [&now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO pipeline_settings (key, value, description, updated_at)
         VALUES ('document_cleaner.use_ai', 'false', 'Enable AI-guided cleaning', ?1)",
        [&now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO pipeline_settings (key, value, description, updated_at)
         VALUES ('document_cleaner.min_chars_for_ai', '1000',
                 'Minimum content size for AI-guided cleaning', ?1)",
        [&now],
    )?;

    Ok(())
}
