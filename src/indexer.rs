//! The source indexer: one incremental ingestion run.
//!
//! A run walks the project's input directories, fingerprints every file,
//! classifies the result against the previous manifest, extracts only what
//! is new or changed, applies those changes to the corpus, and persists the
//! corpus first and the manifest second.
//!
//! # State machine
//!
//! ```text
//! UNINITIALIZED ──(total ≤ threshold)──▶ FULL ──(total > threshold)──▶ SECTIONED
//!       └──────────(total > threshold)─────────────────────────────────────▲
//! ```
//!
//! There is no way back from `SECTIONED`. The layout (`per_file` or
//! `combined`) is fixed by the first run and recorded in the manifest.
//!
//! # Failure policy
//!
//! Per-file failures are collected into [`IngestReport::errors`] and never
//! abort the run. A changed file that fails extraction keeps its previous
//! entry (and is retried next run); a new file that fails stays out of the
//! manifest. Manifest persistence is retried a few times and then fails the
//! run with [`IngestError::Persistence`].

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::corpus::{self, CombinedCorpus};
use crate::error::{FileError, IngestError};
use crate::events::{self, FilesIngested};
use crate::extract::ExtractorRegistry;
use crate::fingerprint::fingerprint;
use crate::lock::IngestLock;
use crate::manifest::{
    ContextStrategy, Delta, FileEntry, Layout, Manifest, RunSummary, SectionLocation,
};
use crate::models::{estimate_tokens, Extraction, InputFile, ParsedSection};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};
use crate::project::Project;
use crate::scan::scan_inputs;

const MANIFEST_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Re-extract every current file and rebuild the corpus from scratch.
    pub full: bool,
    /// Classify only; write nothing.
    pub dry_run: bool,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub project: String,
    pub layout: Layout,
    pub context_strategy: ContextStrategy,
    /// `true` when this run moved the project from full to sectioned.
    pub escalated: bool,
    pub new_files: Vec<String>,
    pub changed_files: Vec<String>,
    pub removed_files: Vec<String>,
    pub unchanged: usize,
    /// Unchanged files re-extracted because their corpus artifact was lost.
    pub healed: Vec<String>,
    pub errors: Vec<FileError>,
    pub total_chars: usize,
    pub estimated_tokens: usize,
    pub dry_run: bool,
    pub corpus_written: bool,
}

impl IngestReport {
    pub fn added_count(&self) -> usize {
        self.new_files.len()
    }

    pub fn changed_count(&self) -> usize {
        self.changed_files.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed_files.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Fingerprinted view of the input directories.
struct Inventory {
    inputs: BTreeMap<String, InputFile>,
    unreadable: BTreeSet<String>,
    errors: Vec<FileError>,
}

impl Inventory {
    fn hashes(&self) -> BTreeMap<String, String> {
        self.inputs
            .iter()
            .map(|(path, input)| (path.clone(), input.content_hash.clone()))
            .collect()
    }
}

pub struct Indexer<'a> {
    project: &'a Project,
    registry: &'a ExtractorRegistry,
    progress: &'a dyn IngestProgressReporter,
}

impl<'a> Indexer<'a> {
    pub fn new(project: &'a Project, registry: &'a ExtractorRegistry) -> Self {
        Indexer {
            project,
            registry,
            progress: &NoProgress,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn IngestProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self, options: IngestOptions) -> Result<IngestReport, IngestError> {
        let _lock = if options.dry_run {
            None
        } else {
            Some(IngestLock::acquire(&self.project.lock_path())?)
        };

        let mut inventory = self.take_inventory()?;
        let previous = Manifest::load(&self.project.manifest_path())?;
        let layout = self.resolve_layout(previous.as_ref());
        let empty = BTreeMap::new();
        let previous_files = previous.as_ref().map(|m| &m.files).unwrap_or(&empty);
        let delta = Delta::classify(previous_files, &inventory.hashes(), &inventory.unreadable);

        tracing::debug!(
            project = %self.project.name,
            new = delta.new.len(),
            changed = delta.changed.len(),
            removed = delta.removed.len(),
            unchanged = delta.unchanged.len(),
            "classified inputs"
        );

        if options.dry_run {
            return Ok(self.dry_run_report(previous.as_ref(), layout, delta, inventory.errors));
        }

        let mut run = Run::start(self.project, layout, previous.as_ref(), &delta, options.full);
        let mut errors = std::mem::take(&mut inventory.errors);
        let extracted = self.extract_all(&run.to_extract, &inventory, &mut errors);

        let mut manifest = previous.clone().unwrap_or_else(|| Manifest::new(layout));
        manifest.layout = layout;
        for path in &delta.removed {
            manifest.files.remove(path);
        }

        let corpus_written = match layout {
            Layout::PerFile => {
                run.apply_per_file(self.project, &mut manifest, &inventory, &extracted)?
            }
            Layout::Combined => run.apply_combined(
                self.project,
                &mut manifest,
                &inventory,
                &extracted,
                self.project.settings.threshold_chars,
            )?,
        };

        let summary = RunSummary {
            new_files: succeeded(&delta.new, &extracted),
            changed_files: succeeded(&delta.changed, &extracted),
            removed_files: delta.removed.clone(),
        };
        manifest.summary = summary;
        manifest.refresh_totals();
        if layout == Layout::PerFile {
            manifest.context_strategy = ContextStrategy::next(
                previous.as_ref().map(|m| m.context_strategy),
                manifest.total_chars,
                self.project.settings.threshold_chars,
            );
        }

        if previous.as_ref() != Some(&manifest) {
            persist_manifest(&manifest, &self.project.manifest_path())?;
        }
        run.remove_orphans(self.project, &manifest);

        let report = IngestReport {
            project: self.project.name.clone(),
            layout,
            context_strategy: manifest.context_strategy,
            escalated: previous.as_ref().map(|m| m.context_strategy) == Some(ContextStrategy::Full)
                && manifest.context_strategy == ContextStrategy::Sectioned,
            new_files: manifest.summary.new_files.clone(),
            changed_files: manifest.summary.changed_files.clone(),
            removed_files: manifest.summary.removed_files.clone(),
            unchanged: delta.unchanged.len(),
            healed: run.healed.iter().filter(|p| extracted.contains_key(*p)).cloned().collect(),
            errors,
            total_chars: manifest.total_chars,
            estimated_tokens: manifest.estimated_tokens,
            dry_run: false,
            corpus_written,
        };

        events::record_ingestion(
            &self.project.events_path(),
            FilesIngested {
                new: report.added_count(),
                changed: report.changed_count(),
                removed: report.removed_count(),
                errors: report.errors.len(),
                context_strategy: report.context_strategy,
            },
        );

        tracing::info!(
            project = %report.project,
            new = report.added_count(),
            changed = report.changed_count(),
            removed = report.removed_count(),
            errors = report.errors.len(),
            strategy = %report.context_strategy,
            "ingestion complete"
        );
        Ok(report)
    }

    fn take_inventory(&self) -> Result<Inventory, IngestError> {
        self.progress.report(IngestProgressEvent::Discovering {
            project: self.project.name.clone(),
        });
        let scan = scan_inputs(self.project)?;

        let mut inventory = Inventory {
            inputs: BTreeMap::new(),
            unreadable: scan.errors.iter().map(|e| e.path.clone()).collect(),
            errors: scan.errors,
        };
        let total = scan.files.len() as u64;
        for (i, file) in scan.files.into_iter().enumerate() {
            self.progress.report(IngestProgressEvent::Fingerprinting {
                project: self.project.name.clone(),
                n: i as u64 + 1,
                total,
            });
            match fingerprint(&file.abs_path) {
                Ok(content_hash) => {
                    inventory.inputs.insert(
                        file.path.clone(),
                        InputFile {
                            path: file.path,
                            abs_path: file.abs_path,
                            content_hash,
                            size_bytes: file.size_bytes,
                            format: file.format,
                            mime: file.mime,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(path = %file.path, error = %err, "could not fingerprint");
                    inventory.errors.push(FileError::io(&file.path, &err));
                    inventory.unreadable.insert(file.path);
                }
            }
        }
        Ok(inventory)
    }

    fn resolve_layout(&self, previous: Option<&Manifest>) -> Layout {
        let configured = Layout::from(self.project.settings.layout);
        match previous {
            Some(manifest) if manifest.layout != configured => {
                tracing::warn!(
                    project = %self.project.name,
                    recorded = %manifest.layout,
                    configured = %configured,
                    "configured layout differs from the recorded one; keeping the recorded layout"
                );
                manifest.layout
            }
            Some(manifest) => manifest.layout,
            None => configured,
        }
    }

    fn extract_all(
        &self,
        paths: &[String],
        inventory: &Inventory,
        errors: &mut Vec<FileError>,
    ) -> BTreeMap<String, Extraction> {
        let mut extracted = BTreeMap::new();
        let total = paths.len() as u64;
        for (i, path) in paths.iter().enumerate() {
            self.progress.report(IngestProgressEvent::Extracting {
                project: self.project.name.clone(),
                n: i as u64 + 1,
                total,
            });
            let Some(input) = inventory.inputs.get(path) else {
                continue;
            };
            match self.registry.extract(&input.abs_path) {
                Ok(extraction) => {
                    tracing::debug!(
                        path = %path,
                        chars = extraction.text.chars().count(),
                        "extracted"
                    );
                    extracted.insert(path.clone(), extraction);
                }
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "extraction failed");
                    errors.push(FileError::from_extract(path, &err));
                }
            }
        }
        extracted
    }

    fn dry_run_report(
        &self,
        previous: Option<&Manifest>,
        layout: Layout,
        delta: Delta,
        errors: Vec<FileError>,
    ) -> IngestReport {
        IngestReport {
            project: self.project.name.clone(),
            layout,
            context_strategy: previous
                .map(|m| m.context_strategy)
                .unwrap_or(ContextStrategy::Full),
            escalated: false,
            new_files: delta.new,
            changed_files: delta.changed,
            removed_files: delta.removed,
            unchanged: delta.unchanged.len(),
            healed: Vec::new(),
            errors,
            total_chars: previous.map(|m| m.total_chars).unwrap_or(0),
            estimated_tokens: previous.map(|m| m.estimated_tokens).unwrap_or(0),
            dry_run: true,
            corpus_written: false,
        }
    }
}

/// Ingests a project with the built-in extractors and no progress output.
pub fn ingest(project: &Project, options: IngestOptions) -> Result<IngestReport, IngestError> {
    let registry = ExtractorRegistry::with_defaults(project.settings.max_extract_bytes);
    Indexer::new(project, &registry).run(options)
}

/// Per-run working state between classification and persistence.
struct Run {
    layout: Layout,
    /// Paths to extract, sorted.
    to_extract: Vec<String>,
    healed: Vec<String>,
    /// Combined layout: the verified on-disk corpus, when usable.
    corpus: Option<CombinedCorpus>,
    /// Combined layout: rewrite every block instead of patching.
    rebuild: bool,
    /// Per-file layout: artifact names referenced before this run.
    previous_artifacts: BTreeSet<String>,
    full: bool,
}

impl Run {
    fn start(
        project: &Project,
        layout: Layout,
        previous: Option<&Manifest>,
        delta: &Delta,
        full: bool,
    ) -> Self {
        let mut run = Run {
            layout,
            to_extract: Vec::new(),
            healed: Vec::new(),
            corpus: None,
            rebuild: full,
            previous_artifacts: previous
                .map(|m| {
                    m.files
                        .values()
                        .filter_map(|e| e.parsed_file())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            full,
        };

        match (layout, previous) {
            (Layout::PerFile, Some(manifest)) if !full => {
                let dir = project.sections_dir();
                run.healed = delta
                    .unchanged
                    .iter()
                    .filter(|path| {
                        manifest.files[path.as_str()]
                            .parsed_file()
                            .map(|name| !dir.join(name).is_file())
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect();
            }
            (Layout::Combined, Some(manifest)) if !manifest.files.is_empty() => {
                match CombinedCorpus::load(&project.combined_path(), manifest) {
                    Ok(corpus) => run.corpus = Some(corpus),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "combined corpus unusable, rebuilding it from the inputs"
                        );
                        run.rebuild = true;
                        if !full {
                            run.healed = delta.unchanged.clone();
                        }
                    }
                }
            }
            _ => {}
        }
        for path in &run.healed {
            tracing::warn!(path = %path, "corpus artifact missing, re-extracting");
        }

        let mut to_extract: BTreeSet<String> =
            delta.new.iter().chain(&delta.changed).cloned().collect();
        if full {
            to_extract.extend(delta.unchanged.iter().cloned());
        }
        to_extract.extend(run.healed.iter().cloned());
        run.to_extract = to_extract.into_iter().collect();
        run
    }

    /// Writes one artifact per successful extraction. Returns whether any
    /// artifact was written.
    fn apply_per_file(
        &mut self,
        project: &Project,
        manifest: &mut Manifest,
        inventory: &Inventory,
        extracted: &BTreeMap<String, Extraction>,
    ) -> Result<bool, IngestError> {
        let dir = project.sections_dir();
        // Names of removed files stay reserved until the manifest that drops
        // them is on disk.
        let mut taken: BTreeSet<String> = manifest
            .files
            .values()
            .filter_map(|e| e.parsed_file())
            .map(str::to_string)
            .chain(self.previous_artifacts.iter().cloned())
            .collect();

        for (path, extraction) in extracted {
            let Some(input) = inventory.inputs.get(path) else {
                continue;
            };
            let name = match manifest.files.get(path).and_then(|e| e.parsed_file()) {
                Some(existing) => existing.to_string(),
                None => corpus::assign_artifact_name(path, &input.content_hash, &taken),
            };
            taken.insert(name.clone());
            corpus::write_artifact(&dir, &name, &extraction.text)?;
            manifest.files.insert(
                path.clone(),
                file_entry(input, extraction, SectionLocation::PerFile { parsed_file: name }),
            );
        }
        manifest.corpus_digest = None;
        Ok(!extracted.is_empty())
    }

    /// Patches (or rebuilds) the combined corpus, applies escalation, and
    /// writes the corpus if its bytes changed. Returns whether it was written.
    fn apply_combined(
        &mut self,
        project: &Project,
        manifest: &mut Manifest,
        inventory: &Inventory,
        extracted: &BTreeMap<String, Extraction>,
        threshold: usize,
    ) -> Result<bool, IngestError> {
        let previous_strategy = manifest.context_strategy;
        let previous_digest = manifest.corpus_digest.clone();

        let section_for = |path: &str, extraction: &Extraction| {
            inventory.inputs.get(path).map(|input| ParsedSection {
                source_file: path.to_string(),
                format: input.format,
                text: extraction.text.clone(),
            })
        };

        let mut corpus = if self.rebuild {
            let old = self.corpus.take();
            let mut order: Vec<String> = manifest
                .combined_order()
                .into_iter()
                .map(|(path, _, _)| path.to_string())
                .collect();
            let known: BTreeSet<String> = order.iter().cloned().collect();
            order.extend(extracted.keys().filter(|p| !known.contains(*p)).cloned());

            let mut fresh = CombinedCorpus::new();
            for path in &order {
                let section = match extracted.get(path) {
                    Some(extraction) => section_for(path, extraction),
                    None => old.as_ref().and_then(|c| {
                        c.slice(path).map(|text| ParsedSection {
                            source_file: path.clone(),
                            format: manifest.files[path.as_str()].format,
                            text,
                        })
                    }),
                };
                match section {
                    Some(section) => {
                        fresh.append(&section);
                    }
                    None => {
                        tracing::warn!(
                            path = %path,
                            "no text available for section, dropping its entry until it extracts"
                        );
                        manifest.files.remove(path);
                    }
                }
            }
            fresh
        } else {
            let mut corpus = self.corpus.take().unwrap_or_default();
            for path in manifest_removed(&corpus, manifest) {
                corpus.remove(&path);
            }
            for (path, extraction) in extracted {
                if let Some(section) = section_for(path, extraction) {
                    if !corpus.replace(&section) {
                        corpus.append(&section);
                    }
                }
            }
            corpus
        };

        for (path, extraction) in extracted {
            if let Some(input) = inventory.inputs.get(path) {
                let placeholder = SectionLocation::Combined {
                    start_line: 0,
                    end_line: 0,
                };
                manifest.files.insert(path.clone(), file_entry(input, extraction, placeholder));
            }
        }

        manifest.refresh_totals();
        let strategy =
            ContextStrategy::next(Some(previous_strategy), manifest.total_chars, threshold);
        if previous_strategy == ContextStrategy::Full && strategy == ContextStrategy::Sectioned {
            tracing::info!(
                total_chars = manifest.total_chars,
                threshold,
                "escalating to sectioned, reflowing corpus offsets"
            );
            corpus.reflow();
        }
        manifest.context_strategy = strategy;
        sync_locations(manifest, &corpus);

        let rendered = corpus.render();
        let digest = crate::fingerprint::fingerprint_bytes(rendered.as_bytes());
        let on_disk = project.combined_path().is_file();
        manifest.corpus_digest = Some(digest.clone());
        if !self.rebuild && on_disk && previous_digest.as_deref() == Some(digest.as_str()) {
            return Ok(false);
        }
        corpus.write(&project.combined_path())?;
        Ok(true)
    }

    /// Deletes per-file artifacts no longer referenced by the persisted
    /// manifest. On a full rebuild, unreferenced strays in the sections
    /// directory go too.
    fn remove_orphans(&self, project: &Project, manifest: &Manifest) {
        if self.layout != Layout::PerFile {
            return;
        }
        let dir = project.sections_dir();
        let live: BTreeSet<&str> = manifest
            .files
            .values()
            .filter_map(|e| e.parsed_file())
            .collect();

        let mut orphans: BTreeSet<String> = self
            .previous_artifacts
            .iter()
            .filter(|name| !live.contains(name.as_str()))
            .cloned()
            .collect();
        if self.full {
            if let Ok(entries) = std::fs::read_dir(&dir) {
                orphans.extend(
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().to_string())
                        .filter(|name| name.ends_with(".md") && !live.contains(name.as_str())),
                );
            }
        }

        for name in orphans {
            match std::fs::remove_file(dir.join(&name)) {
                Ok(()) => tracing::debug!(artifact = %name, "removed orphaned artifact"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!(
                    artifact = %name,
                    error = %err,
                    "could not remove orphaned artifact"
                ),
            }
        }
    }
}

/// Blocks in the corpus whose path no longer has a manifest entry.
fn manifest_removed(corpus: &CombinedCorpus, manifest: &Manifest) -> Vec<String> {
    corpus
        .spans()
        .iter()
        .filter(|span| !manifest.files.contains_key(&span.source))
        .map(|span| span.source.clone())
        .collect()
}

/// Copies every block's final offsets into its manifest entry.
fn sync_locations(manifest: &mut Manifest, corpus: &CombinedCorpus) {
    for span in corpus.spans() {
        if let Some(entry) = manifest.files.get_mut(&span.source) {
            entry.location = SectionLocation::Combined {
                start_line: span.start_line,
                end_line: span.end_line,
            };
        }
    }
    manifest.files.retain(|path, _| corpus.contains(path));
}

fn file_entry(input: &InputFile, extraction: &Extraction, location: SectionLocation) -> FileEntry {
    let chars = extraction.text.chars().count();
    FileEntry {
        content_hash: input.content_hash.clone(),
        size_bytes: input.size_bytes,
        format: input.format,
        mime: input.mime.clone(),
        chars,
        estimated_tokens: estimate_tokens(chars),
        extracted_at: Utc::now(),
        page_hints: extraction.page_hints.clone(),
        location,
    }
}

fn succeeded(paths: &[String], extracted: &BTreeMap<String, Extraction>) -> Vec<String> {
    paths.iter().filter(|p| extracted.contains_key(*p)).cloned().collect()
}

fn persist_manifest(manifest: &Manifest, path: &std::path::Path) -> Result<(), IngestError> {
    with_retries(MANIFEST_SAVE_ATTEMPTS, || manifest.save(path))
}

fn with_retries(
    attempts: u32,
    mut save: impl FnMut() -> Result<(), IngestError>,
) -> Result<(), IngestError> {
    let mut attempt = 1;
    loop {
        match save() {
            Ok(()) => return Ok(()),
            Err(err) if attempt < attempts => {
                tracing::error!(attempt, error = %err, "manifest write failed, retrying");
                std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(attempt, error = %err, "manifest write failed, giving up");
                return Err(err);
            }
        }
    }
}
