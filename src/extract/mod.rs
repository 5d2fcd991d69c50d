//! Multi-format text extraction.
//!
//! Each supported [`FileFormat`] is served by one [`ContentExtractor`],
//! looked up through an [`ExtractorRegistry`]. Extraction never panics the
//! run: every failure comes back as an [`ExtractError`] and the ingest
//! pipeline records it against the file and moves on.
//!
//! | Format | Extractor |
//! |--------|-----------|
//! | text (`txt`, `md`, `rtf`, `text`) | [`TextExtractor`] |
//! | `csv` | [`CsvExtractor`] |
//! | `pdf` | [`PdfExtractor`] (`pdf-extract`) |
//! | `docx` | [`ooxml::DocxExtractor`] |
//! | `xlsx` | [`ooxml::XlsxExtractor`] |
//! | `eml` | [`email::EmailExtractor`] |
//! | images | [`ImageExtractor`] (reference text only) |

pub mod email;
pub mod ooxml;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Extraction, FileFormat};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is {size} bytes, over the {limit} byte extraction limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("email parsing failed: {0}")]
    Email(String),
}

/// Turns one file into plain text.
///
/// Implementations read the file themselves; the registry has already
/// checked the extension and size limit. Returned text is normalized by the
/// registry (see [`Extraction::normalized`]).
pub trait ContentExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Formats this extractor claims when registered.
    fn formats(&self) -> &[FileFormat];

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError>;
}

pub struct ExtractorRegistry {
    extractors: HashMap<FileFormat, Arc<dyn ContentExtractor>>,
    max_bytes: u64,
}

impl ExtractorRegistry {
    /// An empty registry; every extraction fails as unsupported until
    /// extractors are registered.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            extractors: HashMap::new(),
            max_bytes,
        }
    }

    /// A registry with the built-in extractor for every supported format.
    pub fn with_defaults(max_bytes: u64) -> Self {
        let mut registry = Self::new(max_bytes);
        registry.register(TextExtractor);
        registry.register(CsvExtractor);
        registry.register(PdfExtractor);
        registry.register(ooxml::DocxExtractor);
        registry.register(ooxml::XlsxExtractor);
        registry.register(email::EmailExtractor);
        registry.register(ImageExtractor);
        registry
    }

    /// Registers an extractor for all of its formats, replacing any
    /// extractor previously registered for them.
    pub fn register<E: ContentExtractor + 'static>(&mut self, extractor: E) {
        let extractor: Arc<dyn ContentExtractor> = Arc::new(extractor);
        for format in extractor.formats() {
            self.extractors.insert(*format, Arc::clone(&extractor));
        }
    }

    pub fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let extractor = FileFormat::from_extension(&ext)
            .and_then(|format| self.extractors.get(&format))
            .ok_or_else(|| ExtractError::UnsupportedFormat(format!(".{}", ext)))?;

        let size = std::fs::metadata(path)?.len();
        if size > self.max_bytes {
            return Err(ExtractError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        tracing::debug!(path = %path.display(), extractor = extractor.name(), "extracting");
        extractor.extract(path).map(Extraction::normalized)
    }
}

pub struct TextExtractor;

impl ContentExtractor for TextExtractor {
    fn name(&self) -> &str {
        "text"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Text]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = std::fs::read(path)?;
        Ok(Extraction::text(String::from_utf8_lossy(&bytes)))
    }
}

pub struct CsvExtractor;

impl ContentExtractor for CsvExtractor {
    fn name(&self) -> &str {
        "csv"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Csv]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = std::fs::read(path)?;
        Ok(Extraction::text(csv_to_text(&String::from_utf8_lossy(&bytes))))
    }
}

/// Re-renders CSV rows as ` | `-joined lines, dropping empty rows.
///
/// The delimiter is whichever of `,` `;` or tab appears most often in the
/// first line.
pub fn csv_to_text(input: &str) -> String {
    let first_line = input.lines().next().unwrap_or("");
    let delimiter = [',', ';', '\t']
        .into_iter()
        .max_by_key(|d| first_line.matches(*d).count())
        .unwrap_or(',');

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            c if c == delimiter && !in_quotes => row.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows.iter()
        .map(|r| r.iter().map(|c| c.trim()).collect::<Vec<_>>())
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .map(|r| r.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PdfExtractor;

impl ContentExtractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Pdf]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_pdf(&bytes).map(Extraction::text)
    }
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed input; keep it contained to this file.
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }))
    .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
    .map_err(|e| ExtractError::Pdf(e.to_string()))
}

pub struct ImageExtractor;

impl ContentExtractor for ImageExtractor {
    fn name(&self) -> &str {
        "image"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Image]
    }

    /// Images are consumed downstream by a vision model; the corpus only
    /// carries a reference line naming the file.
    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let media_type = mime_guess::from_path(path).first_or_octet_stream();
        Ok(Extraction::text(format!(
            "[image: {} ({}, {} bytes) attached for visual review]",
            name,
            media_type.essence_str(),
            size
        )))
    }
}
