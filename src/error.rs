//! Error taxonomy for ingestion.
//!
//! Two tiers: [`IngestError`] is what a run (or a section read) can fail
//! with as a whole (corrupt manifest, persistence, lock), while [`FileError`] describes a
//! single input file that could not be fingerprinted or extracted. File
//! errors are collected into the run report and never abort sibling files.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "manifest {} is corrupt: {reason} (inspect or move it aside, then re-run to start fresh)",
        path.display()
    )]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus {} does not match the manifest: {reason}", path.display())]
    CorpusOutOfSync { path: PathBuf, reason: String },

    #[error("no section for '{0}' in the manifest")]
    UnknownSection(String),

    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to lock project at {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Category of a per-file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorKind {
    Io,
    UnsupportedFormat,
    Extraction,
}

/// A per-file failure reported alongside the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub path: String,
    pub kind: FileErrorKind,
    pub reason: String,
}

impl FileError {
    pub fn io(path: &str, err: &std::io::Error) -> Self {
        FileError {
            path: path.to_string(),
            kind: FileErrorKind::Io,
            reason: err.to_string(),
        }
    }

    pub fn from_extract(path: &str, err: &ExtractError) -> Self {
        let kind = match err {
            ExtractError::UnsupportedFormat(_) => FileErrorKind::UnsupportedFormat,
            ExtractError::Io(_) => FileErrorKind::Io,
            _ => FileErrorKind::Extraction,
        };
        FileError {
            path: path.to_string(),
            kind,
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}
