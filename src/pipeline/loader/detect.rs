//! Real-format detection.
//!
//! The extension decides the baseline format, but converted PDFs are common:
//! a `.pdf` exported from PowerPoint or Excel keeps telltale producer
//! metadata, page geometry and text patterns. Those are routed to dedicated
//! extractors so slides and grids survive as structure instead of soup.

use std::path::Path;

use regex::Regex;
use tracing::debug;

use super::pdf;

/// Format a file is actually in, as opposed to what its extension claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedFormat {
    Pdf,
    ConvertedPresentation,
    ConvertedSpreadsheet,
    Docx,
    Xlsx,
    Pptx,
    Text,
    Markdown,
    Csv,
    Json,
    Unknown(String),
}

impl DetectedFormat {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pdf => "pdf",
            Self::ConvertedPresentation => "converted_presentation",
            Self::ConvertedSpreadsheet => "converted_spreadsheet",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Pptx => "pptx",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Unknown(ext) => ext,
        }
    }
}

/// Producer/creator strings that indicate a presentation exported to PDF.
const PRESENTATION_PRODUCERS: [&str; 3] = ["PowerPoint", "Keynote", "Impress"];

/// Producer/creator strings that indicate a spreadsheet exported to PDF.
const SPREADSHEET_PRODUCERS: [&str; 3] = ["Excel", "Calc", "Spreadsheet"];

/// Detect the actual format of a file.
///
/// `file_type` is the stored lowercased extension; content sniffing fills in
/// when the extension is missing or lies about the container.
pub fn detect_format(path: &Path, file_type: &str) -> DetectedFormat {
    let ext = if file_type.is_empty() {
        sniff_extension(path).unwrap_or_default()
    } else {
        file_type.to_string()
    };

    match ext.as_str() {
        "pdf" => classify_pdf(path),
        "docx" => DetectedFormat::Docx,
        "xlsx" | "xlsm" => DetectedFormat::Xlsx,
        "pptx" => DetectedFormat::Pptx,
        "txt" | "text" | "log" => DetectedFormat::Text,
        "md" | "markdown" => DetectedFormat::Markdown,
        "csv" | "tsv" => DetectedFormat::Csv,
        "json" => DetectedFormat::Json,
        other => DetectedFormat::Unknown(other.to_string()),
    }
}

/// Sniff the container type from file content when the extension is absent.
fn sniff_extension(path: &Path) -> Option<String> {
    let kind = infer::get_from_path(path).ok().flatten()?;
    Some(kind.extension().to_string())
}

/// Decide whether a PDF is native or a converted office document.
fn classify_pdf(path: &Path) -> DetectedFormat {
    let Ok(info) = pdf::pdf_info(path) else {
        return DetectedFormat::Pdf;
    };

    let software = format!(
        "{} {}",
        info.producer.as_deref().unwrap_or(""),
        info.creator.as_deref().unwrap_or("")
    );

    if PRESENTATION_PRODUCERS.iter().any(|p| software.contains(p)) {
        debug!("PDF {} detected as converted presentation", path.display());
        return DetectedFormat::ConvertedPresentation;
    }
    if SPREADSHEET_PRODUCERS.iter().any(|p| software.contains(p)) {
        debug!("PDF {} detected as converted spreadsheet", path.display());
        return DetectedFormat::ConvertedSpreadsheet;
    }

    // No producer hint: fall back to geometry and text patterns from the
    // first page.
    let sample = pdf::page_text(path, 1).unwrap_or_default();
    let landscape = info.aspect_ratio.map(|r| r > 1.2).unwrap_or(false);

    if landscape && looks_like_slides(&sample) {
        debug!(
            "PDF {} detected as converted presentation (geometry)",
            path.display()
        );
        return DetectedFormat::ConvertedPresentation;
    }
    if looks_like_grid(&sample) {
        debug!(
            "PDF {} detected as converted spreadsheet (grid text)",
            path.display()
        );
        return DetectedFormat::ConvertedSpreadsheet;
    }

    DetectedFormat::Pdf
}

/// Slide-like text: few lines, mostly short, bullet markers present.
fn looks_like_slides(sample: &str) -> bool {
    let lines: Vec<&str> = sample
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() || lines.len() > 25 {
        return false;
    }
    let short = lines.iter().filter(|line| line.len() < 60).count();
    let bullets = lines
        .iter()
        .filter(|line| line.starts_with('•') || line.starts_with('-') || line.starts_with('*'))
        .count();
    bullets > 0 || short * 10 >= lines.len() * 8
}

/// Grid-like text: repeated cell references or aligned column runs.
fn looks_like_grid(sample: &str) -> bool {
    let cell_ref = Regex::new(r"\b[A-Z]{1,2}\d{1,4}\b").unwrap();
    let refs = cell_ref.find_iter(sample).count();
    if refs >= 4 {
        return true;
    }

    let lines: Vec<&str> = sample
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.len() < 3 {
        return false;
    }
    let columnar = lines
        .iter()
        .filter(|line| line.split("  ").filter(|c| !c.trim().is_empty()).count() >= 3)
        .count();
    columnar * 2 >= lines.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_routing() {
        let p = Path::new("x.docx");
        assert_eq!(detect_format(p, "docx"), DetectedFormat::Docx);
        assert_eq!(detect_format(p, "md"), DetectedFormat::Markdown);
        assert_eq!(
            detect_format(p, "zip"),
            DetectedFormat::Unknown("zip".to_string())
        );
    }

    #[test]
    fn grid_text_detection() {
        let grid = "Region  Quota  Attainment\nWest  100  95%\nEast  120  101%\n";
        assert!(looks_like_grid(grid));
        assert!(!looks_like_grid("Just a paragraph of prose, nothing else."));
    }

    #[test]
    fn slide_text_detection() {
        let slides = "Q1 Review\n• Revenue up\n• Churn flat\n";
        assert!(looks_like_slides(slides));
        let prose: String = (0..40).map(|i| format!("line {i} with plenty of words in it to be long enough\n")).collect();
        assert!(!looks_like_slides(&prose));
    }
}
