//! Pipeline settings and cleaning rules.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::warn;

use super::{Result, StateStore};
use crate::models::{CleaningRule, RuleContext, RuleKind};

impl StateStore {
    /// Read a setting value. Values are strings; callers coerce.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM pipeline_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a setting value (upsert).
    pub fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO pipeline_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read an integer setting, falling back to the default on absence or
    /// unparseable values.
    pub fn get_setting_usize(&self, key: &str, default: usize) -> usize {
        match self.get_setting(key) {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid value for setting {}: {}, using {}", key, raw, default);
                default
            }),
            Ok(None) => default,
            Err(e) => {
                warn!("Error reading setting {}: {}, using {}", key, e, default);
                default
            }
        }
    }

    /// Read a boolean setting (`true`/`false`, case-insensitive).
    pub fn get_setting_bool(&self, key: &str, default: bool) -> bool {
        match self.get_setting(key) {
            Ok(Some(raw)) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
            Ok(None) => default,
            Err(e) => {
                warn!("Error reading setting {}: {}, using {}", key, e, default);
                default
            }
        }
    }

    /// Active cleaning rules ordered by priority, then insertion order.
    pub fn get_cleaning_rules(&self) -> Result<Vec<CleaningRule>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, pattern, replacement, pattern_type, priority, context, active, sort_order
             FROM cleaning_patterns
             WHERE active = 1
             ORDER BY priority ASC, sort_order ASC, id ASC",
        )?;
        let rules = stmt
            .query_map([], |row| {
                let kind_raw: String = row.get(3)?;
                let context_raw: String = row.get(5)?;
                Ok(CleaningRule {
                    id: row.get(0)?,
                    pattern: row.get(1)?,
                    replacement: row.get(2)?,
                    kind: RuleKind::from_str(&kind_raw).unwrap_or(RuleKind::Exact),
                    priority: row.get(4)?,
                    context: RuleContext::parse(&context_raw),
                    active: row.get::<_, i64>(6)? != 0,
                    sort_order: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Insert a cleaning rule, returning its id.
    pub fn add_cleaning_rule(
        &self,
        pattern: &str,
        replacement: &str,
        kind: RuleKind,
        priority: i64,
        context: &str,
    ) -> Result<i64> {
        let conn = self.connect()?;
        let next_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM cleaning_patterns",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO cleaning_patterns
             (pattern, replacement, pattern_type, priority, context, active, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![pattern, replacement, kind.as_str(), priority, context, next_order],
        )?;
        Ok(conn.last_insert_rowid())
    }
}
