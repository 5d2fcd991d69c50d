//! Core data models used throughout ingestion.
//!
//! These types represent the input files, their extracted text, and the
//! per-format metadata that flow from discovery through extraction into the
//! corpus and manifest.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Approximate chars-per-token ratio used for size reporting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token estimate for a character count.
pub fn estimate_tokens(chars: usize) -> usize {
    chars / CHARS_PER_TOKEN
}

/// Input format, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Text,
    Csv,
    Pdf,
    Docx,
    Xlsx,
    Email,
    Image,
}

impl FileFormat {
    /// Maps a file extension (case-insensitive, without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let format = match ext.to_ascii_lowercase().as_str() {
            "txt" | "md" | "rtf" | "text" => FileFormat::Text,
            "csv" => FileFormat::Csv,
            "pdf" => FileFormat::Pdf,
            "docx" => FileFormat::Docx,
            "xlsx" => FileFormat::Xlsx,
            "eml" => FileFormat::Email,
            "png" | "jpg" | "jpeg" | "gif" | "webp" => FileFormat::Image,
            _ => return None,
        };
        Some(format)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Text => "text",
            FileFormat::Csv => "csv",
            FileFormat::Pdf => "pdf",
            FileFormat::Docx => "docx",
            FileFormat::Xlsx => "xlsx",
            FileFormat::Email => "email",
            FileFormat::Image => "image",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file discovered in one of the project's input directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Project-relative path with `/` separators; the file's identity.
    pub path: String,
    pub abs_path: PathBuf,
    /// SHA-256 hex digest of the file bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    pub format: FileFormat,
    pub mime: String,
}

/// A page (or sheet) boundary inside extracted text, as a char range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHint {
    pub page: u32,
    pub char_range: (usize, usize),
}

/// Extractor output for a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub page_hints: Vec<PageHint>,
}

impl Extraction {
    pub fn text(text: impl Into<String>) -> Self {
        Extraction {
            text: text.into(),
            page_hints: Vec::new(),
        }
    }

    /// Normalizes line endings to LF and trims trailing whitespace, clamping
    /// page hints to the resulting length.
    pub fn normalized(self) -> Self {
        let text = if self.text.contains('\r') {
            self.text.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            self.text
        };
        let text = text.trim_end().to_string();
        let len = text.chars().count();
        let page_hints = self
            .page_hints
            .into_iter()
            .filter(|h| h.char_range.0 <= len)
            .map(|h| PageHint {
                page: h.page,
                char_range: (h.char_range.0, h.char_range.1.min(len)),
            })
            .collect();
        Extraction { text, page_hints }
    }
}

/// The extracted-text representation of one input file, as held by the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSection {
    pub source_file: String,
    pub format: FileFormat,
    pub text: String,
}
