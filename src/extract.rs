//! Page-level text extraction for uploaded documents.
//!
//! The file extension picks the extractor:
//!
//! | Extension | Pages |
//! |-----------|-------|
//! | `.pdf` | one per PDF page, via `pdf-extract` |
//! | `.txt`, `.md`, `.markdown` | the whole file as page 1 |
//!
//! A malformed or unsupported file is reported as an [`ExtractError`] and
//! nothing is indexed. Extraction is synchronous and CPU-bound; async
//! callers go through [`crate::ingest`], which runs it on the blocking pool.

use std::path::Path;

use thiserror::Error;

/// Form feed; some PDFs carry it between pages of extracted text.
const PAGE_BREAK: char = '\u{c}';

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("file is not valid UTF-8 text")]
    Encoding,
}

/// The kinds of document that can be ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Detect from the file name's extension, case-insensitively.
    pub fn from_file_name(file_name: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "txt" | "md" | "markdown" => Ok(DocumentKind::Text),
            _ => Err(ExtractError::UnsupportedFileType(if ext.is_empty() {
                file_name.to_string()
            } else {
                format!(".{}", ext)
            })),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "text",
        }
    }
}

/// Text of one page, numbered from 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: usize,
    pub text: String,
}

impl Page {
    /// Heuristic: several lines that split into three or more columns on
    /// tabs, pipes, or wide runs of spaces.
    pub fn has_tables(&self) -> bool {
        self.text
            .lines()
            .filter(|line| looks_tabular(line))
            .take(2)
            .count()
            >= 2
    }
}

/// Extract the pages of `bytes`, choosing the format from `file_name`.
pub fn extract_pages(bytes: &[u8], file_name: &str) -> Result<Vec<Page>, ExtractError> {
    match DocumentKind::from_file_name(file_name)? {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Text => extract_text(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            number: i + 1,
            text: text.replace(PAGE_BREAK, "\n"),
        })
        .collect())
}

fn extract_text(bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Ok(vec![Page {
        number: 1,
        text: text.to_string(),
    }])
}

fn looks_tabular(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    if line.matches('\t').count() >= 2 || line.matches('|').count() >= 3 {
        return true;
    }
    line.split("  ")
        .filter(|cell| !cell.trim().is_empty())
        .count()
        >= 3
}

/// Minimal single-page PDF with one line of Helvetica text.
#[cfg(test)]
pub(crate) fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
