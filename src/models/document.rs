//! Document, batch and pipeline-state models.
//!
//! Documents are registered once by the INPUT stage and then carried through
//! the pipeline by `(document, stage)` records with upsert semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::section::SectionKind;

/// Pipeline processing stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Input,
    Load,
    Clean,
    Process,
    Index,
}

impl PipelineStage {
    /// All stages in pipeline order.
    pub const ALL: [PipelineStage; 5] = [
        Self::Input,
        Self::Load,
        Self::Clean,
        Self::Process,
        Self::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Load => "load",
            Self::Clean => "clean",
            Self::Process => "process",
            Self::Index => "index",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Self::Input),
            "load" => Some(Self::Load),
            "clean" => Some(Self::Clean),
            "process" => Some(Self::Process),
            "index" => Some(Self::Index),
            _ => None,
        }
    }

    /// The stage whose completion feeds this one, if any.
    pub fn predecessor(&self) -> Option<Self> {
        match self {
            Self::Input => None,
            Self::Load => Some(Self::Input),
            Self::Clean => Some(Self::Load),
            Self::Process => Some(Self::Clean),
            Self::Index => Some(Self::Process),
        }
    }
}

/// Status of a document within a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Partial,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Partial => "partial",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "partial" => Some(Self::Partial),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A registered document moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (UUID).
    pub id: String,
    /// Sanitized filename used inside stage directories.
    pub name: String,
    /// Filename as received in `unprocessed/`.
    pub original_filename: String,
    /// Foreign key into `document_types`.
    pub document_type_id: i64,
    /// Batch the document was registered under.
    pub batch_id: String,
    /// Size of the source file in bytes.
    pub file_size: u64,
    /// Lowercased extension without the leading dot.
    pub file_type: String,
    /// Arbitrary metadata, augmented by LOAD/CLEAN/PROCESS.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Short form of the id used in stage filenames: dashes removed,
    /// truncated to 12 characters.
    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }
}

/// Short form of a document id: dashes removed, truncated to 12 chars.
pub(crate) fn short_id(id: &str) -> String {
    let compact: String = id.chars().filter(|c| *c != '-').collect();
    compact.chars().take(12).collect()
}

/// A named document category carrying the prompt used by PROCESS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentType {
    pub id: i64,
    /// Category name, e.g. `comp_plan`.
    pub name: String,
    /// Prompt used for structured extraction; generic fallback when absent.
    pub ai_prompt: Option<String>,
}

/// A group of documents registered together at INPUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub name: String,
    /// Number of documents found at creation; never changes afterwards.
    pub document_count: u64,
    pub status: BatchStatus,
    /// Stage that created the batch.
    pub stage: PipelineStage,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A `(document, stage)` row in the pipeline-state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub document_id: String,
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub error_message: Option<String>,
    pub batch_id: String,
    pub document_type_id: i64,
    pub updated_at: DateTime<Utc>,
}

/// Pattern kind for a cleaning rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Regex,
    Exact,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Exact => "exact",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "regex" => Some(Self::Regex),
            "exact" => Some(Self::Exact),
            _ => None,
        }
    }
}

/// Context restriction for a cleaning rule.
///
/// Tags other than `all` and the five section kinds are preserved but never
/// match any section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleContext {
    All,
    Section(SectionKind),
    Other(String),
}

impl RuleContext {
    pub fn parse(s: &str) -> Self {
        match s {
            "all" => Self::All,
            other => match SectionKind::from_str(other) {
                Some(kind) => Self::Section(kind),
                None => Self::Other(other.to_string()),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Section(kind) => kind.as_str(),
            Self::Other(s) => s,
        }
    }

    /// Whether a rule with this context applies to the given section kind.
    pub fn applies_to(&self, kind: SectionKind) -> bool {
        match self {
            Self::All => true,
            Self::Section(k) => *k == kind,
            Self::Other(_) => false,
        }
    }
}

/// A cleaning rule applied by the CLEAN stage.
///
/// Smaller `priority` runs first; `sort_order` (insertion order) breaks ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningRule {
    pub id: i64,
    pub pattern: String,
    pub replacement: String,
    pub kind: RuleKind,
    pub priority: i64,
    pub context: RuleContext,
    pub active: bool,
    pub sort_order: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_round_trip() {
        for stage in PipelineStage::ALL {
            assert_eq!(PipelineStage::from_str(stage.as_str()), Some(stage));
        }
        assert_eq!(PipelineStage::from_str("report"), None);
    }

    #[test]
    fn stage_predecessors_follow_pipeline_order() {
        assert_eq!(PipelineStage::Input.predecessor(), None);
        assert_eq!(
            PipelineStage::Index.predecessor(),
            Some(PipelineStage::Process)
        );
    }

    #[test]
    fn short_id_strips_dashes() {
        assert_eq!(
            short_id("123e4567-e89b-12d3-a456-426614174000"),
            "123e4567e89b"
        );
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn rule_context_parsing() {
        assert_eq!(RuleContext::parse("all"), RuleContext::All);
        assert_eq!(
            RuleContext::parse("table"),
            RuleContext::Section(SectionKind::Table)
        );
        // Unknown contexts are inert, not errors
        let other = RuleContext::parse("sidebar");
        assert!(!other.applies_to(SectionKind::Body));
    }
}
