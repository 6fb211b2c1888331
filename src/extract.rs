//! Page-level text extraction.
//!
//! PDFs are split into pages with `pdf-extract`; plain-text formats are read
//! as a single page. Extraction never panics: failures come back as
//! [`ExtractError`] and the loader skips the file.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("text file is not valid UTF-8")]
    Utf8,
}

/// Kind of source file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "txt" | "md" => Some(FileKind::Text),
            _ => None,
        }
    }
}

/// Extract page texts from file bytes. Page `i` of the result is page `i + 1`
/// of the source.
pub fn extract_pages(bytes: &[u8], path: &Path) -> Result<Vec<String>, ExtractError> {
    match FileKind::from_path(path) {
        Some(FileKind::Pdf) => extract_pdf_pages(bytes),
        Some(FileKind::Text) => {
            let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Utf8)?;
            Ok(vec![text.to_string()])
        }
        None => Err(ExtractError::Unsupported(path.display().to_string())),
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract can panic on malformed font tables.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Pdf("extractor panicked".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}
