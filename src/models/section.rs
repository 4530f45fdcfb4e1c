//! Section model produced by the document cleaner.
//!
//! Sections form a forest: a header at level L claims everything after it
//! until the next header at level <= L. Cleaning never overwrites the raw
//! text; cleaned output lives in a sibling field.

use serde::{Deserialize, Serialize};

/// Structural classification of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Header,
    Body,
    Table,
    Formula,
    Footer,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Body => "body",
            Self::Table => "table",
            Self::Formula => "formula",
            Self::Footer => "footer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "header" => Some(Self::Header),
            "body" => Some(Self::Body),
            "table" => Some(Self::Table),
            "formula" => Some(Self::Formula),
            "footer" => Some(Self::Footer),
            _ => None,
        }
    }
}

/// Fixed SPM framework categories a section can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpmCategory {
    PlanInfo,
    PlanSummary,
    EffectiveDates,
    PayoutSchedule,
    SpecialProvisions,
    TermsAndConditions,
    CompensationComponents,
}

impl SpmCategory {
    /// All categories, in schema order.
    pub const ALL: [SpmCategory; 7] = [
        Self::PlanInfo,
        Self::PlanSummary,
        Self::EffectiveDates,
        Self::PayoutSchedule,
        Self::SpecialProvisions,
        Self::TermsAndConditions,
        Self::CompensationComponents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanInfo => "plan_info",
            Self::PlanSummary => "plan_summary",
            Self::EffectiveDates => "effective_dates",
            Self::PayoutSchedule => "payout_schedule",
            Self::SpecialProvisions => "special_provisions",
            Self::TermsAndConditions => "terms_and_conditions",
            Self::CompensationComponents => "compensation_components",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plan_info" => Some(Self::PlanInfo),
            "plan_summary" => Some(Self::PlanSummary),
            "effective_dates" => Some(Self::EffectiveDates),
            "payout_schedule" => Some(Self::PayoutSchedule),
            "special_provisions" => Some(Self::SpecialProvisions),
            "terms_and_conditions" => Some(Self::TermsAndConditions),
            "compensation_components" => Some(Self::CompensationComponents),
            _ => None,
        }
    }
}

/// A structural unit of a document identified by the cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    /// Header level 1-3; 0 for non-headers.
    pub level: u8,
    pub spm_category: Option<SpmCategory>,
    /// Raw text as scanned, preserved across cleaning.
    pub text: String,
    /// Cleaned text; populated by rule application, never overwrites `text`.
    pub cleaned: Option<String>,
    /// Line index where the section started (for ordering).
    pub start_line: usize,
    pub children: Vec<Section>,
}

impl Section {
    pub fn new(kind: SectionKind, level: u8, start_line: usize) -> Self {
        Self {
            kind,
            level,
            spm_category: None,
            text: String::new(),
            cleaned: None,
            start_line,
            children: Vec::new(),
        }
    }

    /// Combined raw text of this section and all descendants.
    pub fn full_text(&self) -> String {
        let mut text = self.text.clone();
        for child in &self.children {
            text.push('\n');
            text.push_str(&child.full_text());
        }
        text
    }

    /// Count of sections in this subtree, including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Section::subtree_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spm_category_round_trip() {
        for cat in SpmCategory::ALL {
            assert_eq!(SpmCategory::from_str(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn full_text_includes_children() {
        let mut root = Section::new(SectionKind::Header, 1, 0);
        root.text = "TITLE".to_string();
        let mut child = Section::new(SectionKind::Body, 0, 1);
        child.text = "body text".to_string();
        root.children.push(child);
        assert_eq!(root.full_text(), "TITLE\nbody text");
        assert_eq!(root.subtree_len(), 2);
    }
}
