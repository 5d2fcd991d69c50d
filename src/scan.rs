//! Input discovery.
//!
//! Walks each configured input directory of a project and returns the files
//! that match the include globs, miss the exclude globs, and have a supported
//! extension. Globs are matched against the project-relative path
//! (`input/specs/rfp.pdf`), so patterns can target a single input directory.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::error::{FileError, IngestError};
use crate::models::FileFormat;
use crate::project::Project;

/// A discovered input file, before fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub abs_path: PathBuf,
    pub size_bytes: u64,
    pub format: FileFormat,
    pub mime: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Sorted by project-relative path.
    pub files: Vec<ScannedFile>,
    /// Entries that could not be listed or stat'ed.
    pub errors: Vec<FileError>,
}

pub fn scan_inputs(project: &Project) -> Result<ScanOutcome, IngestError> {
    let settings = &project.settings;
    let include_set = build_globset(&settings.include_globs)?;

    let mut default_excludes = vec!["output/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(settings.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut found: BTreeMap<String, ScannedFile> = BTreeMap::new();
    let mut outcome = ScanOutcome::default();

    for dir in project.input_dirs() {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "input directory missing, skipping");
            continue;
        }

        let walker = WalkDir::new(&dir)
            .follow_links(settings.follow_symlinks)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| project.relative_key(p))
                        .unwrap_or_else(|| project.relative_key(&dir));
                    let io = std::io::Error::other(err.to_string());
                    outcome.errors.push(FileError::io(&path, &io));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_str = project.relative_key(path);

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            let Some(format) = FileFormat::from_path(path) else {
                tracing::debug!(path = %rel_str, "unsupported extension, skipping");
                continue;
            };

            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    let io = std::io::Error::other(err.to_string());
                    outcome.errors.push(FileError::io(&rel_str, &io));
                    continue;
                }
            };

            let mime = mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();

            found.insert(
                rel_str.clone(),
                ScannedFile {
                    path: rel_str,
                    abs_path: path.to_path_buf(),
                    size_bytes,
                    format,
                    mime,
                },
            );
        }
    }

    outcome.files = found.into_values().collect();
    Ok(outcome)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, IngestError> {
    let invalid = |pattern: &str, source| IngestError::InvalidGlob {
        pattern: pattern.to_string(),
        source,
    };
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| invalid(pattern, e))?);
    }
    builder.build().map_err(|e| invalid(&patterns.join(", "), e))
}
