//! Section identification and hierarchical organization.
//!
//! A linear scan classifies each line as header (levels 1-3), table, formula,
//! footer or body, and tags sections with SPM framework categories. Headers
//! then organize the flat list into a forest: a header at level L claims
//! subsequent sections until the next header at level <= L.

use regex::{Regex, RegexBuilder};

use crate::models::{Section, SectionKind, SpmCategory};

fn build(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap()
}

/// Compiled line classifiers, built once per cleaner run.
pub struct SectionPatterns {
    markdown_header: Regex,
    all_caps: Regex,
    numbered: Regex,
    roman: Regex,
    letter: Regex,
    known_names: Regex,
    tables: Vec<Regex>,
    formulas: Vec<Regex>,
    footer_page_number: Regex,
    footer_markers: Regex,
    spm: Vec<(SpmCategory, Vec<Regex>)>,
}

impl Default for SectionPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionPatterns {
    pub fn new() -> Self {
        Self {
            markdown_header: Regex::new(r"^(#{1,3})\s+(.+)$").unwrap(),
            all_caps: Regex::new(r"^[A-Z][^a-z\n]{4,}$").unwrap(),
            numbered: Regex::new(r"^(\d+\.)\s+(.+)$").unwrap(),
            roman: Regex::new(r"^([IVX]{1,5}\.)\s+(.+)$").unwrap(),
            letter: Regex::new(r"^([A-Z]\.)\s+(.+)$").unwrap(),
            known_names: build(
                r"^(Plan\s+Overview|Plan\s+Measures|Plan\s+Summary|Payouts|Terms\s+&?\s*Conditions)",
            ),
            tables: vec![
                Regex::new(r"[|+][-+]+[|+]").unwrap(),
                Regex::new(r"^\s*\|.+\|\s*$").unwrap(),
                Regex::new(r"^[^|]+\|[^|]+\|[^|]+").unwrap(),
                Regex::new(r"^\s*-+[-\s]+-+\s*$").unwrap(),
            ],
            formulas: vec![
                Regex::new(r"[%$][\d,.]+\s+(?:per|for)").unwrap(),
                Regex::new(r"[\d,.]+[%$]\s+(?:of|per)").unwrap(),
                Regex::new(r"Attainment.*?[%$]").unwrap(),
                Regex::new(r"Quota.*?Attainment").unwrap(),
                Regex::new(r"Target.*?Incentive").unwrap(),
            ],
            footer_page_number: Regex::new(r"^\s*\d+\s*$").unwrap(),
            footer_markers: Regex::new(r"(Confidential|for Internal Use Only)").unwrap(),
            spm: vec![
                (
                    SpmCategory::PlanInfo,
                    vec![
                        build(r"(Plan\s+Information|Plan\s+Details|Program\s+Information)"),
                        build(r"(Role|Position):\s*([A-Za-z\s]+)"),
                        build(r"(Region|Territory):\s*([A-Za-z\s]+)"),
                        build(r"(Plan\s+Year|Fiscal\s+Year):\s*(\d{4})"),
                    ],
                ),
                (
                    SpmCategory::PlanSummary,
                    vec![
                        build(r"(Plan\s+Summary|Executive\s+Summary|Overview)"),
                        build(r"(Purpose|Objective)(\s+of\s+the\s+Plan)?:"),
                    ],
                ),
                (
                    SpmCategory::EffectiveDates,
                    vec![
                        build(r"(Effective\s+Date|Plan\s+Period|Performance\s+Period)"),
                        build(
                            r"(Start\s+Date|Begin\s+Date):\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\w+\s+\d{1,2},?\s+\d{4})",
                        ),
                        build(
                            r"(End\s+Date|Termination\s+Date):\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\w+\s+\d{1,2},?\s+\d{4})",
                        ),
                    ],
                ),
                (
                    SpmCategory::PayoutSchedule,
                    vec![
                        build(r"(Payout\s+Schedule|Payment\s+Schedule|Payout\s+Timing)"),
                        build(r"(Monthly|Quarterly|Annual)\s+Payments"),
                        build(r"(Payout|Payment)\s+(Calculation|Formula)"),
                    ],
                ),
                (
                    SpmCategory::SpecialProvisions,
                    vec![
                        build(r"(Special\s+Provisions|Exceptions|Adjustments)"),
                        build(r"(Clawback|Windfall|Adjustment)"),
                        build(r"(Termination|Proration|Leave\s+of\s+Absence)"),
                    ],
                ),
                (
                    SpmCategory::TermsAndConditions,
                    vec![
                        build(r"(Terms\s+and\s+Conditions|General\s+Provisions|Plan\s+Rules)"),
                        build(r"(Eligibility|Participation\s+Requirements)"),
                        build(r"(Amendment|Modification)\s+of\s+Plan"),
                        build(r"(Disclaimer|General\s+Terms)"),
                    ],
                ),
                (
                    SpmCategory::CompensationComponents,
                    vec![
                        build(r"(Compensation\s+Components|Incentive\s+Components|Plan\s+Components)"),
                        build(r"(Bonus|Incentive|Commission)\s+Structure"),
                        build(r"(Quota|Target|Goal)\s+Achievement"),
                        build(r"(Revenue|Sales)\s+Attainment"),
                    ],
                ),
            ],
        }
    }

    /// Header detection with level: markdown depth, `1.` and `IV.` at level
    /// 2, `A.` at level 3, all-caps and known section names at level 1.
    fn header_level(&self, line: &str) -> Option<u8> {
        if let Some(caps) = self.markdown_header.captures(line) {
            let hashes = caps.get(1).map(|m| m.len()).unwrap_or(1);
            return Some(hashes.min(3) as u8);
        }
        if self.numbered.is_match(line) || self.roman.is_match(line) {
            return Some(2);
        }
        if self.letter.is_match(line) {
            return Some(3);
        }
        if self.all_caps.is_match(line) || self.known_names.is_match(line) {
            return Some(1);
        }
        None
    }

    fn is_table(&self, line: &str) -> bool {
        self.tables.iter().any(|re| re.is_match(line))
    }

    fn is_formula(&self, line: &str) -> bool {
        self.formulas.iter().any(|re| re.is_match(line))
    }

    fn is_footer(&self, line: &str) -> bool {
        self.footer_page_number.is_match(line) || self.footer_markers.is_match(line)
    }

    /// First SPM category with a pattern matching the line.
    pub fn spm_category(&self, line: &str) -> Option<SpmCategory> {
        self.spm
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(line)))
            .map(|(category, _)| *category)
    }
}

/// Identify sections in document content and organize them hierarchically.
pub fn identify_sections(content: &str, patterns: &SectionPatterns) -> Vec<Section> {
    let flat = scan_sections(content, patterns);
    organize_hierarchically(flat)
}

/// Linear scan producing a flat, ordered section list.
fn scan_sections(content: &str, patterns: &SectionPatterns) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section::new(SectionKind::Body, 0, 0);

    let mut push_current = |sections: &mut Vec<Section>, current: &mut Section, next: Section| {
        if !current.text.trim().is_empty() {
            sections.push(std::mem::replace(current, next));
        } else {
            *current = next;
        }
    };

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            current.text.push_str(line);
            current.text.push('\n');
            continue;
        }

        if let Some(level) = patterns.header_level(trimmed) {
            let mut next = Section::new(SectionKind::Header, level, i);
            next.spm_category = patterns.spm_category(line);
            next.text.push_str(line);
            next.text.push('\n');
            push_current(&mut sections, &mut current, next);
            continue;
        }

        if patterns.is_table(line) {
            if current.kind != SectionKind::Table {
                let mut next = Section::new(SectionKind::Table, 0, i);
                // Tables inherit the surrounding SPM context
                next.spm_category = current.spm_category;
                next.text.push_str(line);
                next.text.push('\n');
                push_current(&mut sections, &mut current, next);
            } else {
                current.text.push_str(line);
                current.text.push('\n');
            }
            continue;
        }

        if patterns.is_formula(line) {
            if current.kind != SectionKind::Formula {
                let mut next = Section::new(SectionKind::Formula, 0, i);
                next.spm_category = Some(SpmCategory::CompensationComponents);
                next.text.push_str(line);
                next.text.push('\n');
                push_current(&mut sections, &mut current, next);
            } else {
                current.text.push_str(line);
                current.text.push('\n');
            }
            continue;
        }

        if patterns.is_footer(line) {
            if current.kind != SectionKind::Footer {
                let next = {
                    let mut s = Section::new(SectionKind::Footer, 0, i);
                    s.text.push_str(line);
                    s.text.push('\n');
                    s
                };
                push_current(&mut sections, &mut current, next);
            } else {
                current.text.push_str(line);
                current.text.push('\n');
            }
            continue;
        }

        match patterns.spm_category(line) {
            Some(category) if current.spm_category != Some(category) => {
                let mut next = Section::new(SectionKind::Body, 0, i);
                next.spm_category = Some(category);
                next.text.push_str(line);
                next.text.push('\n');
                push_current(&mut sections, &mut current, next);
            }
            _ => {
                current.text.push_str(line);
                current.text.push('\n');
            }
        }
    }

    if !current.text.trim().is_empty() {
        sections.push(current);
    }
    sections
}

/// Organize a flat section list into a forest using a header stack.
///
/// A header at level L pops all headers at level >= L, then attaches under
/// the new stack top (or becomes a root). Non-headers attach under the
/// current top.
fn organize_hierarchically(flat: Vec<Section>) -> Vec<Section> {
    let mut roots: Vec<Section> = Vec::new();
    // Stack of index paths into `roots` identifying the open header chain.
    let mut stack: Vec<(u8, Vec<usize>)> = Vec::new();

    fn node_at<'a>(roots: &'a mut Vec<Section>, path: &[usize]) -> &'a mut Section {
        let (first, rest) = path.split_first().expect("non-empty path");
        let mut node = &mut roots[*first];
        for index in rest {
            node = &mut node.children[*index];
        }
        node
    }

    for section in flat {
        if section.kind == SectionKind::Header {
            let level = section.level;
            while stack
                .last()
                .map(|(top_level, _)| *top_level >= level)
                .unwrap_or(false)
            {
                stack.pop();
            }

            let path = match stack.last() {
                Some((_, parent_path)) => {
                    let parent = node_at(&mut roots, parent_path);
                    parent.children.push(section);
                    let mut path = parent_path.clone();
                    path.push(parent.children.len() - 1);
                    path
                }
                None => {
                    roots.push(section);
                    vec![roots.len() - 1]
                }
            };
            stack.push((level, path));
        } else {
            match stack.last() {
                Some((_, parent_path)) => {
                    let parent = node_at(&mut roots, parent_path);
                    parent.children.push(section);
                }
                None => roots.push(section),
            }
        }
    }

    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sections: &[Section]) -> Vec<SectionKind> {
        sections.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn classifies_headers_with_levels() {
        let patterns = SectionPatterns::new();
        assert_eq!(patterns.header_level("# Top"), Some(1));
        assert_eq!(patterns.header_level("### Deep"), Some(3));
        assert_eq!(patterns.header_level("1. Scope"), Some(2));
        assert_eq!(patterns.header_level("IV. Payouts"), Some(2));
        assert_eq!(patterns.header_level("A. Definitions"), Some(3));
        assert_eq!(patterns.header_level("PLAN OVERVIEW"), Some(1));
        assert_eq!(patterns.header_level("regular sentence here"), None);
    }

    #[test]
    fn all_caps_requires_minimum_length() {
        let patterns = SectionPatterns::new();
        assert_eq!(patterns.header_level("FAQ"), None);
        assert_eq!(patterns.header_level("PAYOUTS"), Some(1));
    }

    #[test]
    fn scan_splits_on_structure() {
        let patterns = SectionPatterns::new();
        let content = "PLAN OVERVIEW\nThis plan covers the west region.\n| Tier | Rate |\n| 1 | 5% |\nnormal text again\n";
        let flat = scan_sections(content, &patterns);
        assert_eq!(
            kinds(&flat),
            vec![SectionKind::Header, SectionKind::Body, SectionKind::Table]
        );
        // Plain lines after a table extend the table section
        assert!(flat[2].text.contains("normal text again"));
    }

    #[test]
    fn formula_lines_tag_compensation() {
        let patterns = SectionPatterns::new();
        let flat = scan_sections("$1,000 per unit sold\n", &patterns);
        assert_eq!(flat[0].kind, SectionKind::Formula);
        assert_eq!(
            flat[0].spm_category,
            Some(SpmCategory::CompensationComponents)
        );
    }

    #[test]
    fn hierarchy_nests_under_headers() {
        let patterns = SectionPatterns::new();
        let content = "# Plan\nintro text\n## Payouts\npayout body\n## Terms\nterms body\n# Appendix\nappendix body\n";
        let roots = identify_sections(content, &patterns);
        assert_eq!(roots.len(), 2);
        // First root: "# Plan" with body + two level-2 headers
        assert_eq!(roots[0].children.len(), 3);
        assert_eq!(roots[0].children[1].kind, SectionKind::Header);
        assert_eq!(roots[0].children[1].children.len(), 1);
        // Second root claims the remaining content
        assert_eq!(roots[1].children.len(), 1);
    }

    #[test]
    fn header_at_same_level_pops_stack() {
        let patterns = SectionPatterns::new();
        let content = "## First\na\n## Second\nb\n";
        let roots = identify_sections(content, &patterns);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].children.len(), 1);
        assert_eq!(roots[1].children.len(), 1);
    }

    #[test]
    fn spm_category_tags_known_sections() {
        let patterns = SectionPatterns::new();
        assert_eq!(
            patterns.spm_category("Payout Schedule"),
            Some(SpmCategory::PayoutSchedule)
        );
        assert_eq!(
            patterns.spm_category("Terms and Conditions"),
            Some(SpmCategory::TermsAndConditions)
        );
        assert_eq!(patterns.spm_category("nothing special"), None);
    }
}
