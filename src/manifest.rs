//! The ingestion manifest.
//!
//! `output/requirements_manifest.json` is the single persisted record of what
//! has been ingested: a content hash and corpus location per input file, the
//! corpus layout and context strategy, and the delta of the most recent run.
//! Downstream readers locate sections exclusively through it.
//!
//! The file is always replaced wholesale through a temp-file rename, so a
//! reader sees either the previous manifest or the new one, never a mix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use crate::config::LayoutConfig;
use crate::error::IngestError;
use crate::models::{FileFormat, PageHint};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    PerFile,
    Combined,
}

impl From<LayoutConfig> for Layout {
    fn from(value: LayoutConfig) -> Self {
        match value {
            LayoutConfig::PerFile => Layout::PerFile,
            LayoutConfig::Combined => Layout::Combined,
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Layout::PerFile => "per_file",
            Layout::Combined => "combined",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    Full,
    Sectioned,
}

impl ContextStrategy {
    /// The strategy after a run: escalates past the threshold, never
    /// downgrades once sectioned.
    pub fn next(previous: Option<ContextStrategy>, total_chars: usize, threshold: usize) -> Self {
        if previous == Some(ContextStrategy::Sectioned) || total_chars > threshold {
            ContextStrategy::Sectioned
        } else {
            ContextStrategy::Full
        }
    }
}

impl std::fmt::Display for ContextStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContextStrategy::Full => "full",
            ContextStrategy::Sectioned => "sectioned",
        })
    }
}

/// Indexer state of a project, derived from its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Uninitialized,
    Full,
    Sectioned,
}

impl IndexState {
    pub fn of(manifest: Option<&Manifest>) -> Self {
        match manifest.map(|m| m.context_strategy) {
            None => IndexState::Uninitialized,
            Some(ContextStrategy::Full) => IndexState::Full,
            Some(ContextStrategy::Sectioned) => IndexState::Sectioned,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Full => "full",
            IndexState::Sectioned => "sectioned",
        }
    }
}

/// Where a section lives in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionLocation {
    /// Per-file layout: artifact name inside `requirements_sections/`.
    PerFile { parsed_file: String },
    /// Combined layout: 1-based inclusive line range of the section text.
    Combined { start_line: usize, end_line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub content_hash: String,
    pub size_bytes: u64,
    pub format: FileFormat,
    pub mime: String,
    pub chars: usize,
    pub estimated_tokens: usize,
    pub extracted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_hints: Vec<PageHint>,
    #[serde(flatten)]
    pub location: SectionLocation,
}

impl FileEntry {
    pub fn parsed_file(&self) -> Option<&str> {
        match &self.location {
            SectionLocation::PerFile { parsed_file } => Some(parsed_file),
            SectionLocation::Combined { .. } => None,
        }
    }

    pub fn line_range(&self) -> Option<(usize, usize)> {
        match self.location {
            SectionLocation::Combined {
                start_line,
                end_line,
            } => Some((start_line, end_line)),
            SectionLocation::PerFile { .. } => None,
        }
    }
}

/// Delta of the most recent run. Overwritten, never accumulated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub new_files: Vec<String>,
    pub changed_files: Vec<String>,
    pub removed_files: Vec<String>,
}

impl RunSummary {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.changed_files.is_empty() && self.removed_files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub layout: Layout,
    pub context_strategy: ContextStrategy,
    pub total_chars: usize,
    pub estimated_tokens: usize,
    /// SHA-256 of the combined corpus file this manifest describes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_digest: Option<String>,
    pub files: BTreeMap<String, FileEntry>,
    pub summary: RunSummary,
}

impl Manifest {
    pub fn new(layout: Layout) -> Self {
        Manifest {
            version: MANIFEST_VERSION,
            layout,
            context_strategy: ContextStrategy::Full,
            total_chars: 0,
            estimated_tokens: 0,
            corpus_digest: None,
            files: BTreeMap::new(),
            summary: RunSummary::default(),
        }
    }

    /// Loads the manifest; `Ok(None)` when none exists yet.
    ///
    /// A manifest that exists but does not parse is an error, never a fresh
    /// start: silently discarding it would hide the loss of ingestion history.
    pub fn load(path: &Path) -> Result<Option<Self>, IngestError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(IngestError::io(path, err)),
        };
        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| IngestError::ManifestCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(IngestError::ManifestCorrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported manifest version {} (expected {})",
                    manifest.version, MANIFEST_VERSION
                ),
            });
        }
        Ok(Some(manifest))
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| IngestError::persistence(path, std::io::Error::other(e)))?;
        bytes.push(b'\n');
        write_atomic(path, &bytes)
    }

    /// Recomputes the size totals from the entries.
    pub fn refresh_totals(&mut self) {
        self.total_chars = self.files.values().map(|e| e.chars).sum();
        self.estimated_tokens = crate::models::estimate_tokens(self.total_chars);
    }

    /// Combined-layout entries ordered by their position in the corpus.
    pub fn combined_order(&self) -> Vec<(&str, usize, usize)> {
        let mut spans: Vec<(&str, usize, usize)> = self
            .files
            .iter()
            .filter_map(|(path, e)| e.line_range().map(|(s, end)| (path.as_str(), s, end)))
            .collect();
        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }
}

/// Writes `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| IngestError::persistence(dir, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| IngestError::persistence(path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| IngestError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| IngestError::persistence(path, e.error))?;
    Ok(())
}

/// Classification of current inputs against the previous manifest.
///
/// Identity is the project-relative path: a renamed file is a removal plus
/// an addition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl Delta {
    /// `current` maps path → content hash of every readable input.
    /// `unreadable` holds files that could not be fingerprinted and
    /// directories that could not be listed. Nothing at or below those paths
    /// is removed or re-ingested, so previous entries there survive.
    pub fn classify(
        previous: &BTreeMap<String, FileEntry>,
        current: &BTreeMap<String, String>,
        unreadable: &BTreeSet<String>,
    ) -> Self {
        let shadowed = |path: &str| {
            unreadable.iter().any(|u| {
                path == u
                    || path
                        .strip_prefix(u.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        };
        let mut delta = Delta::default();
        for (path, hash) in current {
            match previous.get(path) {
                None => delta.new.push(path.clone()),
                Some(entry) if entry.content_hash != *hash => delta.changed.push(path.clone()),
                Some(_) => delta.unchanged.push(path.clone()),
            }
        }
        delta.removed = previous
            .keys()
            .filter(|p| !current.contains_key(*p) && !shadowed(p.as_str()))
            .cloned()
            .collect();
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(hash: &str, location: SectionLocation) -> FileEntry {
        FileEntry {
            content_hash: hash.to_string(),
            size_bytes: 10,
            format: FileFormat::Text,
            mime: "text/plain".to_string(),
            chars: 10,
            estimated_tokens: 2,
            extracted_at: DateTime::parse_from_rfc3339("2026-01-05T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            page_hints: Vec::new(),
            location,
        }
    }

    fn per_file(name: &str) -> SectionLocation {
        SectionLocation::PerFile {
            parsed_file: name.to_string(),
        }
    }

    #[test]
    fn classify_splits_new_changed_removed_unchanged() {
        let mut previous = BTreeMap::new();
        previous.insert("input/a.txt".to_string(), entry("h1", per_file("a")));
        previous.insert("input/b.txt".to_string(), entry("h2", per_file("b")));
        previous.insert("input/c.txt".to_string(), entry("h3", per_file("c")));
        previous.insert("input/locked.txt".to_string(), entry("h4", per_file("l")));

        let mut current = BTreeMap::new();
        current.insert("input/a.txt".to_string(), "h1".to_string());
        current.insert("input/b.txt".to_string(), "h2-edited".to_string());
        current.insert("input/d.txt".to_string(), "h5".to_string());
        let unreadable: BTreeSet<String> = ["input/locked.txt".to_string()].into();

        let delta = Delta::classify(&previous, &current, &unreadable);
        assert_eq!(delta.new, vec!["input/d.txt"]);
        assert_eq!(delta.changed, vec!["input/b.txt"]);
        assert_eq!(delta.removed, vec!["input/c.txt"]);
        assert_eq!(delta.unchanged, vec!["input/a.txt"]);
    }

    #[test]
    fn unlistable_directory_keeps_the_entries_below_it() {
        let mut previous = BTreeMap::new();
        previous.insert("input/specs/a.pdf".to_string(), entry("h1", per_file("a")));
        previous.insert("input/specs/deep/b.pdf".to_string(), entry("h2", per_file("b")));
        previous.insert("input/specs-old.pdf".to_string(), entry("h3", per_file("c")));
        previous.insert("input/brief.md".to_string(), entry("h4", per_file("d")));
        let mut current = BTreeMap::new();
        current.insert("input/brief.md".to_string(), "h4".to_string());
        let unreadable: BTreeSet<String> = ["input/specs".to_string()].into();

        let delta = Delta::classify(&previous, &current, &unreadable);
        assert_eq!(delta.removed, vec!["input/specs-old.pdf"]);
        assert_eq!(delta.unchanged, vec!["input/brief.md"]);
        assert!(delta.new.is_empty() && delta.changed.is_empty());
    }

    #[test]
    fn strategy_escalates_and_never_downgrades() {
        assert_eq!(ContextStrategy::next(None, 10, 100), ContextStrategy::Full);
        assert_eq!(ContextStrategy::next(None, 101, 100), ContextStrategy::Sectioned);
        assert_eq!(
            ContextStrategy::next(Some(ContextStrategy::Full), 100, 100),
            ContextStrategy::Full
        );
        assert_eq!(
            ContextStrategy::next(Some(ContextStrategy::Full), 650_000, 600_000),
            ContextStrategy::Sectioned
        );
        assert_eq!(
            ContextStrategy::next(Some(ContextStrategy::Sectioned), 0, 600_000),
            ContextStrategy::Sectioned
        );
    }

    #[test]
    fn missing_manifest_is_uninitialized() {
        let tmp = TempDir::new().unwrap();
        let loaded = Manifest::load(&tmp.path().join("requirements_manifest.json")).unwrap();
        assert!(loaded.is_none());
        assert_eq!(IndexState::of(loaded.as_ref()), IndexState::Uninitialized);
    }

    #[test]
    fn corrupt_manifest_is_an_error_not_a_fresh_start() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("requirements_manifest.json");
        std::fs::write(&path, "{\"files\": [").unwrap();
        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err, IngestError::ManifestCorrupt { .. }));
    }

    #[test]
    fn wrong_version_is_reported_as_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("m.json");
        let mut manifest = Manifest::new(Layout::PerFile);
        manifest.version = 99;
        std::fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();
        let err = Manifest::load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported manifest version 99"));
    }

    #[test]
    fn wire_format_uses_contract_field_names() {
        let mut manifest = Manifest::new(Layout::Combined);
        manifest.files.insert(
            "input/a.pdf".to_string(),
            entry(
                "abc",
                SectionLocation::Combined {
                    start_line: 2,
                    end_line: 9,
                },
            ),
        );
        manifest.summary.new_files.push("input/a.pdf".to_string());

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["context_strategy"], "full");
        assert_eq!(value["layout"], "combined");
        let file = &value["files"]["input/a.pdf"];
        assert_eq!(file["content_hash"], "abc");
        assert_eq!(file["start_line"], 2);
        assert_eq!(file["end_line"], 9);
        assert_eq!(file["extracted_at"], "2026-01-05T10:00:00Z");
        assert!(file.get("parsed_file").is_none());
        assert!(file.get("page_hints").is_none());
        assert_eq!(value["summary"]["new_files"][0], "input/a.pdf");
        assert!(value["summary"]["removed_files"].as_array().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_locations() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("output/requirements_manifest.json");
        let mut manifest = Manifest::new(Layout::PerFile);
        manifest
            .files
            .insert("input/a.txt".to_string(), entry("h1", per_file("input__a.txt.md")));
        manifest.refresh_totals();
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.files["input/a.txt"].parsed_file(), Some("input__a.txt.md"));
        assert_eq!(loaded.total_chars, 10);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "requirements_manifest.json")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[test]
    fn combined_order_sorts_by_start_line() {
        let mut manifest = Manifest::new(Layout::Combined);
        let blocks = [("input/z.txt", 2, 4), ("input/a.txt", 7, 7), ("input/m.txt", 10, 12)];
        for (path, start, end) in blocks {
            manifest.files.insert(
                path.to_string(),
                entry("h", SectionLocation::Combined { start_line: start, end_line: end }),
            );
        }
        let order: Vec<&str> = manifest.combined_order().into_iter().map(|(p, _, _)| p).collect();
        assert_eq!(order, vec!["input/z.txt", "input/a.txt", "input/m.txt"]);
    }
}
