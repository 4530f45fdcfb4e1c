//! Cleaning-rule application and document reconstruction.
//!
//! Rules run per section in priority order (smaller first, insertion order
//! breaks ties), restricted to rules whose context is `all` or matches the
//! section kind. Regex rules use multiline semantics; `exact` rules are
//! literal. After rules, a kind-specific whitespace policy applies.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::models::{CleaningRule, RuleKind, Section, SectionKind};

/// A rule with its regex compiled up front. Rules whose pattern fails to
/// compile are skipped with a warning rather than failing the document.
pub struct CompiledRule {
    rule: CleaningRule,
    regex: Option<Regex>,
}

/// Compile rules, preserving the store's priority ordering.
pub fn compile_rules(rules: Vec<CleaningRule>) -> Vec<CompiledRule> {
    rules
        .into_iter()
        .map(|rule| {
            let regex = match rule.kind {
                RuleKind::Regex => match RegexBuilder::new(&rule.pattern).multi_line(true).build()
                {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Skipping unparseable cleaning rule {}: {e}", rule.id);
                        None
                    }
                },
                RuleKind::Exact => None,
            };
            CompiledRule { rule, regex }
        })
        .collect()
}

/// Apply the applicable rules to one section's text, then the section-kind
/// whitespace policy. Deterministic for a fixed rule set and input.
pub fn clean_section_text(section: &Section, rules: &[CompiledRule]) -> String {
    let mut text = section.text.clone();

    for compiled in rules {
        if !compiled.rule.context.applies_to(section.kind) {
            continue;
        }
        match compiled.rule.kind {
            RuleKind::Regex => {
                if let Some(re) = &compiled.regex {
                    text = re
                        .replace_all(&text, compiled.rule.replacement.as_str())
                        .into_owned();
                }
            }
            RuleKind::Exact => {
                text = text.replace(&compiled.rule.pattern, &compiled.rule.replacement);
            }
        }
    }

    apply_whitespace_policy(&text, section.kind)
}

fn apply_whitespace_policy(text: &str, kind: SectionKind) -> String {
    match kind {
        // Preserve table structure
        SectionKind::Table => text.trim_end().to_string(),
        // Preserve formula layout, trim excessive runs only
        SectionKind::Formula => {
            let collapsed = Regex::new(r"\s{3,}")
                .unwrap()
                .replace_all(text, "  ")
                .into_owned();
            collapsed.trim_end().to_string()
        }
        // Short footers are noise
        SectionKind::Footer => {
            let trimmed = text.trim();
            if trimmed.len() < 30 {
                String::new()
            } else {
                trimmed.to_string()
            }
        }
        // Collapse whitespace runs for prose
        SectionKind::Header | SectionKind::Body => {
            let collapsed = Regex::new(r"\s+").unwrap().replace_all(text, " ");
            collapsed.trim().to_string()
        }
    }
}

/// Clean a section tree in place, populating each node's `cleaned` field.
pub fn clean_tree(section: &mut Section, rules: &[CompiledRule]) {
    section.cleaned = Some(clean_section_text(section, rules));
    for child in &mut section.children {
        clean_tree(child, rules);
    }
}

/// Depth-first reconstruction of cleaned sections, inserting blank lines
/// between top-level sections, then collapsing runs of 3+ newlines to 2.
pub fn reconstruct(sections: &[Section]) -> String {
    fn rebuild(section: &Section) -> String {
        let mut text = section
            .cleaned
            .clone()
            .unwrap_or_else(|| section.text.clone());
        let child_text: Vec<String> = section
            .children
            .iter()
            .map(rebuild)
            .filter(|t| !t.is_empty())
            .collect();
        if !child_text.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&child_text.join("\n"));
        }
        text
    }

    let mut out = String::new();
    for section in sections {
        let text = rebuild(section);
        if !text.is_empty() {
            out.push_str("\n\n");
            out.push_str(&text);
        }
    }

    let collapsed = Regex::new(r"\n{3,}").unwrap().replace_all(&out, "\n\n");
    collapsed.trim().to_string()
}
