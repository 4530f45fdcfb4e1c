//! Format-specific content extraction.
//!
//! Every extractor returns a unified [`Extraction`] record: plain-text
//! content, a structural breakdown, document metadata, the method used, a
//! quality score in [0, 1], and the OCR heuristic flag for PDFs.

use std::path::Path;

use thiserror::Error;

use crate::models::DocumentStructure;

use super::detect::DetectedFormat;
use super::{ooxml, pdf};

/// Errors that can occur during content extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Unified result of format-specific extraction.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Unified plain-text content.
    pub content: String,
    pub structure: DocumentStructure,
    /// Title/author/producer and other format metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub extraction_method: String,
    pub extraction_quality: f64,
    /// PDF heuristic only: total text under 100 chars across pages.
    pub needs_ocr: bool,
}

/// Dispatch to the extractor for a detected format.
pub fn extract(path: &Path, format: &DetectedFormat) -> Result<Extraction> {
    match format {
        DetectedFormat::Pdf => pdf::extract_native(path),
        DetectedFormat::ConvertedPresentation => pdf::extract_presentation(path),
        DetectedFormat::ConvertedSpreadsheet => pdf::extract_spreadsheet(path),
        DetectedFormat::Docx => ooxml::extract_docx(path),
        DetectedFormat::Xlsx => ooxml::extract_xlsx(path),
        DetectedFormat::Pptx => ooxml::extract_pptx(path),
        DetectedFormat::Text => extract_plain(path, "text"),
        DetectedFormat::Markdown => extract_plain(path, "markdown"),
        DetectedFormat::Csv => extract_plain(path, "csv"),
        DetectedFormat::Json => extract_json(path),
        DetectedFormat::Unknown(ext) => Ok(extract_unknown(ext)),
    }
}

/// Plain text, markdown and CSV read directly at full quality.
fn extract_plain(path: &Path, method: &str) -> Result<Extraction> {
    let content = std::fs::read_to_string(path)?;
    Ok(Extraction {
        content,
        extraction_method: method.to_string(),
        extraction_quality: 1.0,
        ..Default::default()
    })
}

/// JSON is read directly and additionally exposes its parsed structure.
fn extract_json(path: &Path) -> Result<Extraction> {
    let content = std::fs::read_to_string(path)?;
    let mut metadata = serde_json::Map::new();
    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(value) => {
            if let Some(obj) = value.as_object() {
                metadata.insert(
                    "json_keys".to_string(),
                    serde_json::Value::Array(
                        obj.keys()
                            .map(|k| serde_json::Value::String(k.clone()))
                            .collect(),
                    ),
                );
            }
            metadata.insert("parsed_structure".to_string(), value);
        }
        Err(e) => {
            metadata.insert(
                "json_parse_error".to_string(),
                serde_json::Value::String(e.to_string()),
            );
        }
    }
    Ok(Extraction {
        content,
        metadata,
        extraction_method: "json".to_string(),
        extraction_quality: 1.0,
        ..Default::default()
    })
}

/// Unknown formats produce a placeholder with zero quality.
fn extract_unknown(ext: &str) -> Extraction {
    Extraction {
        content: format!("[Unsupported file format: {ext}]"),
        extraction_method: "unsupported".to_string(),
        extraction_quality: 0.0,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_placeholder() {
        let result = extract_unknown("xyz");
        assert_eq!(result.content, "[Unsupported file format: xyz]");
        assert_eq!(result.extraction_quality, 0.0);
    }

    #[test]
    fn json_exposes_parsed_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"content": "hello", "pages": 3}"#).unwrap();

        let result = extract_json(&path).unwrap();
        assert_eq!(result.extraction_quality, 1.0);
        let keys = result.metadata.get("json_keys").unwrap().as_array().unwrap();
        assert_eq!(keys.len(), 2);
    }
}
