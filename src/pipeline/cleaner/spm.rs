//! Schema-guided SPM component extraction.
//!
//! For each SPM-tagged section the category-specific extractor pulls typed
//! fields (plan info, effective dates, payout schedule, special provisions,
//! terms and conditions, compensation components) into the shape given by
//! the document type's schema.

use regex::RegexBuilder;
use serde_json::{json, Map, Value};

use crate::models::{Section, SectionKind, SpmCategory};

fn find(pattern: &str, text: &str) -> Option<String> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Case-sensitive variant for patterns that rely on capitalization.
fn find_cs(pattern: &str, text: &str) -> Option<String> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn matches(pattern: &str, text: &str) -> bool {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Extract SPM components from a section forest per the schema definition.
///
/// The result mirrors the schema shape: object fields start empty, list
/// fields start as empty arrays, scalar fields as null.
pub fn extract_spm_components(sections: &[Section], schema: &Value) -> Value {
    let mut components = init_from_schema(schema);
    for section in sections {
        collect(section, schema, &mut components);
    }
    components
}

fn init_from_schema(schema: &Value) -> Value {
    let mut out = Map::new();
    if let Some(obj) = schema.as_object() {
        for (key, value) in obj {
            let initial = match value {
                Value::Object(_) => Value::Object(Map::new()),
                Value::Array(_) => Value::Array(Vec::new()),
                _ => Value::Null,
            };
            out.insert(key.clone(), initial);
        }
    }
    Value::Object(out)
}

fn collect(section: &Section, schema: &Value, components: &mut Value) {
    if let Some(category) = section.spm_category {
        let key = category.as_str();
        if components.get(key).is_some() {
            match category {
                SpmCategory::PlanInfo => {
                    merge_value(components, key, extract_plan_info(section));
                }
                SpmCategory::PlanSummary => {
                    merge_value(components, key, Value::String(section.full_text().trim().to_string()));
                }
                SpmCategory::EffectiveDates => {
                    merge_value(components, key, extract_effective_dates(section));
                }
                SpmCategory::PayoutSchedule => {
                    push_value(components, key, extract_payout_schedule(section));
                }
                SpmCategory::SpecialProvisions => {
                    push_value(components, key, extract_special_provision(section));
                }
                SpmCategory::TermsAndConditions => {
                    push_value(components, key, extract_term_condition(section));
                }
                SpmCategory::CompensationComponents => {
                    push_value(components, key, extract_compensation_component(section));
                }
            }
        }
    }

    for child in &section.children {
        collect(child, schema, components);
    }
}

/// Merge into an object slot: objects update key-wise, scalars fill nulls.
fn merge_value(components: &mut Value, key: &str, value: Value) {
    let Some(slot) = components.get_mut(key) else {
        return;
    };
    match (&mut *slot, value) {
        (Value::Object(existing), Value::Object(update)) => {
            for (k, v) in update {
                if !v.is_null() || !existing.contains_key(&k) {
                    existing.insert(k, v);
                }
            }
        }
        (slot @ Value::Null, value) => *slot = value,
        _ => {}
    }
}

/// Append to a list slot.
fn push_value(components: &mut Value, key: &str, value: Value) {
    if let Some(Value::Array(list)) = components.get_mut(key) {
        list.push(value);
    }
}

fn extract_plan_info(section: &Section) -> Value {
    let text = section.full_text();
    let mut info = json!({
        "role": find(r"(?:role|position):\s*([^,\n]+)", &text),
        "region": find(r"(?:region|territory):\s*([^,\n]+)", &text),
        "plan_id": find(r"(?:plan\s+id|plan\s+number):\s*([^,\n]+)", &text),
        "plan_year": find(r"(?:plan\s+year|fiscal\s+year):\s*(\d{4})", &text),
        "plan_title": find(r"(?:plan\s+title|plan\s+name):\s*([^,\n]+)", &text),
        "process_flow": Value::Null,
        "business_unit": find(r"(?:business\s+unit|division|department):\s*([^,\n]+)", &text),
    });

    // Fall back to an all-caps plan title line
    if info["plan_title"].is_null() {
        if let Some(title) = find_cs(r"^([A-Z][A-Z\s]+(?:PLAN|PROGRAM|INCENTIVE))", &text) {
            info["plan_title"] = Value::String(title);
        }
    }
    info
}

const DATE: &str = r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\w+\s+\d{1,2},?\s+\d{4}";

fn extract_effective_dates(section: &Section) -> Value {
    let text = section.full_text();
    let mut start =
        find(&format!(r"(?:start\s+date|begin\s+date|effective\s+date):\s*({DATE})"), &text);
    let mut end = find(
        &format!(r"(?:end\s+date|termination\s+date|expiration\s+date):\s*({DATE})"),
        &text,
    );

    // Date range phrasing: "period from X to Y"
    if start.is_none() || end.is_none() {
        let range = RegexBuilder::new(&format!(
            r"(?:period|effective)(?:\s+from|\s+of)?\s+({DATE})\s+(?:to|through|until)\s+({DATE})"
        ))
        .case_insensitive(true)
        .build()
        .ok()
        .and_then(|re| {
            re.captures(&text).map(|caps| {
                (
                    caps.get(1).map(|m| m.as_str().trim().to_string()),
                    caps.get(2).map(|m| m.as_str().trim().to_string()),
                )
            })
        });
        if let Some((range_start, range_end)) = range {
            if start.is_none() {
                start = range_start;
            }
            if end.is_none() {
                end = range_end;
            }
        }
    }

    json!({ "start_date": start, "end_date": end })
}

fn extract_payout_schedule(section: &Section) -> Value {
    let text = section.full_text();

    let payout_type = [
        ("monthly", "Monthly"),
        ("quarterly", "Quarterly"),
        ("annual", "Annual"),
        ("bi-weekly", "Bi-Weekly"),
        ("semi-annual", "Semi-Annual"),
    ]
    .iter()
    .find(|(pattern, _)| matches(pattern, &text))
    .map(|(_, label)| *label);

    let conditions = find(r"(?:conditions|requirements|criteria):\s*([^.]+)", &text)
        .unwrap_or_else(|| text.trim().to_string());

    json!({
        "type": payout_type,
        "formula": find(r"(?:formula|calculation):\s*([^.]+)", &text),
        "conditions": conditions,
    })
}

const PROVISION_KEYWORDS: [&str; 17] = [
    "clawback",
    "windfall",
    "leave of absence",
    "termination",
    "proration",
    "adjustment",
    "exception",
    "credit split",
    "dispute",
    "draw",
    "guarantee",
    "advance",
    "eligibility",
    "threshold",
    "minimum",
    "maximum",
    "cap",
];

fn provision_component(keyword: &str) -> Option<&'static str> {
    match keyword {
        "clawback" => Some("Recovery Provisions"),
        "windfall" => Some("Adjustments"),
        "leave of absence" => Some("Eligibility Rules"),
        "termination" => Some("Employment Changes"),
        "proration" => Some("Calculation Adjustments"),
        "credit split" => Some("Crediting Rules"),
        "dispute" => Some("Dispute Management"),
        "draw" => Some("Advanced Payments"),
        "guarantee" => Some("Guaranteed Payments"),
        "cap" => Some("Payment Caps"),
        _ => None,
    }
}

fn extract_special_provision(section: &Section) -> Value {
    let text = section.full_text();
    let keywords: Vec<&str> = PROVISION_KEYWORDS
        .iter()
        .filter(|kw| matches(kw, &text))
        .copied()
        .collect();

    let spm_mapping = if keywords.is_empty() {
        json!({
            "spm_process": null,
            "spm_category": null,
            "spm_component": null,
            "matched_keyword": null,
        })
    } else {
        let component = keywords
            .iter()
            .find_map(|kw| provision_component(kw).map(|c| (*kw, c)));
        json!({
            "spm_process": "Incentive Compensation Management",
            "spm_category": "Special Provisions",
            "spm_component": component.map(|(_, c)| c),
            "matched_keyword": component.map(|(kw, _)| kw).or(keywords.first().copied()),
        })
    };

    json!({
        "name": find_cs(r"^([A-Z][^.]+?)(?::|\.|\n)", &text),
        "keywords": keywords,
        "conditions": find(r"(?:conditions|criteria|requirements):\s*([^.]+)", &text),
        "description": text.trim(),
        "spm_mapping": spm_mapping,
    })
}

const TERM_KEYWORDS: [&str; 15] = [
    "eligibility",
    "participation",
    "amendment",
    "modification",
    "termination",
    "disclaimer",
    "jurisdiction",
    "confidentiality",
    "non-compete",
    "non-solicitation",
    "employment",
    "at-will",
    "tax",
    "compliance",
    "policy",
];

fn term_component(keyword: &str) -> Option<&'static str> {
    match keyword {
        "eligibility" => Some("Eligibility Rules"),
        "participation" => Some("Participation Requirements"),
        "amendment" => Some("Plan Amendment Process"),
        "modification" => Some("Plan Modification Rules"),
        "termination" => Some("Plan Termination Provisions"),
        "confidentiality" => Some("Confidentiality Requirements"),
        "tax" => Some("Tax Implications"),
        "compliance" => Some("Compliance Requirements"),
        _ => None,
    }
}

fn extract_term_condition(section: &Section) -> Value {
    let text = section.full_text();
    let keywords: Vec<&str> = TERM_KEYWORDS
        .iter()
        .filter(|kw| matches(kw, &text))
        .copied()
        .collect();

    let component_type = [
        (r"eligibility|participation", "Eligibility"),
        (r"amendment|modification|change", "Plan Modification"),
        (r"confidentiality|disclosure", "Confidentiality"),
        (r"termination|separation|resignation", "Employment Status"),
        (r"tax|taxation|withholding", "Tax Implications"),
        (r"dispute|resolution|arbitration", "Dispute Resolution"),
        (r"compliance|regulatory|legal", "Compliance"),
    ]
    .iter()
    .find(|(pattern, _)| matches(pattern, &text))
    .map(|(_, label)| *label);

    let spm_mapping = if keywords.is_empty() {
        json!({
            "spm_process": null,
            "spm_category": null,
            "spm_component": null,
            "matched_keyword": null,
        })
    } else {
        let component = keywords
            .iter()
            .find_map(|kw| term_component(kw).map(|c| (*kw, c)));
        json!({
            "spm_process": "Incentive Compensation Management",
            "spm_category": "Plan Governance",
            "spm_component": component.map(|(_, c)| c),
            "matched_keyword": component.map(|(kw, _)| kw).or(keywords.first().copied()),
        })
    };

    json!({
        "keywords": keywords,
        "description": text.trim(),
        "spm_mapping": spm_mapping,
        "component_type": component_type,
    })
}

fn component_spm_mapping(comp_type: &str, keyword: Option<&str>) -> Value {
    let component = match comp_type {
        "Bonus" => Some("Bonus Calculation"),
        "Commission" => Some("Commission Calculation"),
        "Quota-Based Bonus" => Some("Quota Achievement Bonus"),
        "Revenue-Based Commission" => Some("Revenue Attainment Commission"),
        "Multiplier" => Some("Performance Multipliers"),
        "Accelerator" => Some("Accelerator Rules"),
        "SPIF" => Some("Special Incentive Programs"),
        "MBO" => Some("Management by Objectives"),
        "KPI-Based" => Some("KPI-Based Incentives"),
        _ => None,
    };
    json!({
        "spm_process": "Incentive Compensation Management",
        "spm_category": "Incentives",
        "spm_component": component,
        "matched_keyword": keyword,
    })
}

fn extract_compensation_component(section: &Section) -> Value {
    let text = section.full_text();

    let mut keywords: Vec<String> = Vec::new();

    let comp_type = [
        (r"quota.*bonus", "Quota-Based Bonus"),
        (r"revenue.*commission", "Revenue-Based Commission"),
        (r"bonus", "Bonus"),
        (r"commission", "Commission"),
        (r"incentive", "Incentive"),
        (r"multiplier", "Multiplier"),
        (r"accelerator", "Accelerator"),
        (r"spif", "SPIF"),
        (r"mbo", "MBO"),
        (r"kpi", "KPI-Based"),
    ]
    .iter()
    .find(|(pattern, _)| matches(pattern, &text))
    .map(|(pattern, label)| {
        keywords.push((*pattern).to_string());
        *label
    });

    let metric_terms = [
        "quota",
        "revenue",
        "attainment",
        "profit",
        "margin",
        "units",
        "sales",
        "growth",
        "market share",
        "customer",
        "retention",
        "churn",
        "performance",
        "objective",
        "goal",
        "target",
    ];
    let metrics: Vec<&str> = metric_terms
        .iter()
        .filter(|term| matches(term, &text))
        .copied()
        .collect();
    keywords.extend(metrics.iter().map(|m| m.to_string()));

    let frequency = [
        ("semi-annual", "Semi-Annual"),
        ("monthly", "Monthly"),
        ("quarterly", "Quarterly"),
        ("annual", "Annual"),
        ("one-time", "One-Time"),
    ]
    .iter()
    .find(|(pattern, _)| matches(pattern, &text))
    .map(|(_, label)| *label);

    let structure = if section.kind == SectionKind::Table {
        Some("Table-Based")
    } else if section.kind == SectionKind::Formula {
        Some("Formula-Based")
    } else if matches(r"tier|level|step|threshold", &text) {
        Some("Tiered")
    } else if matches(r"formula|calculation|compute", &text) {
        Some("Formula-Based")
    } else if matches(r"flat|fixed", &text) {
        Some("Flat Rate")
    } else {
        None
    };

    let category = [
        (r"base.*salary", "Base Salary"),
        (r"variable.*pay", "Variable Pay"),
        (r"commission", "Commission"),
        (r"bonus", "Bonus"),
        (r"incentive", "Incentive"),
        (r"long.*term", "Long-Term Incentive"),
        (r"recognition", "Recognition Award"),
    ]
    .iter()
    .find(|(pattern, _)| matches(pattern, &text))
    .map(|(_, label)| *label);

    let spm_mapping = match (comp_type, metrics.is_empty()) {
        (Some(ty), false) => component_spm_mapping(ty, keywords.first().map(String::as_str)),
        _ => json!({
            "spm_process": null,
            "spm_category": null,
            "spm_component": null,
            "matched_keyword": null,
        }),
    };

    json!({
        "name": find_cs(r"^([A-Z][^.]+?)(?::|\.|\n)", &text),
        "type": comp_type,
        "metrics": metrics,
        "category": category,
        "keywords": keywords,
        "frequency": frequency,
        "structure": structure,
        "spm_mapping": spm_mapping,
        "target_amount": find(r"(?:target|amount):\s*\$?([\d,.]+)", &text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;

    fn section_with(category: SpmCategory, text: &str) -> Section {
        let mut s = Section::new(SectionKind::Body, 0, 0);
        s.spm_category = Some(category);
        s.text = text.to_string();
        s
    }

    fn comp_plan_schema() -> Value {
        json!({
            "plan_info": {},
            "plan_summary": null,
            "effective_dates": {},
            "payout_schedule": [],
            "special_provisions": [],
            "terms_and_conditions": [],
            "compensation_components": [],
        })
    }

    #[test]
    fn plan_info_fields() {
        let section = section_with(
            SpmCategory::PlanInfo,
            "Role: Territory Manager\nRegion: West\nPlan Year: 2024\n",
        );
        let info = extract_plan_info(&section);
        assert_eq!(info["role"], "Territory Manager");
        assert_eq!(info["region"], "West");
        assert_eq!(info["plan_year"], "2024");
    }

    #[test]
    fn effective_dates_from_range() {
        let section = section_with(
            SpmCategory::EffectiveDates,
            "Performance period from 01/01/2024 to 12/31/2024.\n",
        );
        let dates = extract_effective_dates(&section);
        assert_eq!(dates["start_date"], "01/01/2024");
        assert_eq!(dates["end_date"], "12/31/2024");
    }

    #[test]
    fn payout_schedule_type() {
        let section = section_with(
            SpmCategory::PayoutSchedule,
            "Quarterly payments are made within 45 days.\n",
        );
        let payout = extract_payout_schedule(&section);
        assert_eq!(payout["type"], "Quarterly");
    }

    #[test]
    fn compensation_component_mapping() {
        let section = section_with(
            SpmCategory::CompensationComponents,
            "Sales Bonus: paid on quota attainment, quarterly.\n",
        );
        let comp = extract_compensation_component(&section);
        assert_eq!(comp["type"], "Bonus");
        assert_eq!(comp["frequency"], "Quarterly");
        assert_eq!(
            comp["spm_mapping"]["spm_component"],
            "Bonus Calculation"
        );
    }

    #[test]
    fn schema_guides_result_shape() {
        let sections = vec![
            section_with(SpmCategory::PlanSummary, "This plan rewards growth.\n"),
            section_with(
                SpmCategory::SpecialProvisions,
                "Clawback: payments may be recovered.\n",
            ),
        ];
        let out = extract_spm_components(&sections, &comp_plan_schema());
        assert_eq!(out["plan_summary"], "This plan rewards growth.");
        assert_eq!(out["special_provisions"].as_array().unwrap().len(), 1);
        assert_eq!(
            out["special_provisions"][0]["spm_mapping"]["spm_component"],
            "Recovery Provisions"
        );
        // Untouched list fields stay empty
        assert_eq!(out["payout_schedule"].as_array().unwrap().len(), 0);
    }
}
