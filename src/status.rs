//! Project status and staleness overview.
//!
//! Summarizes what is ingested (state, layout, totals, per-file entries and
//! the last run's delta) and checks the current inputs against the manifest
//! so users and agents know whether `xproject ingest` needs to run. Used by
//! `xproject status`. Never writes anything.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FileError, IngestError};
use crate::extract::ExtractorRegistry;
use crate::indexer::{IngestOptions, Indexer};
use crate::manifest::{ContextStrategy, IndexState, Layout, Manifest, RunSummary, SectionLocation};
use crate::models::FileFormat;
use crate::progress::format_number;
use crate::project::Project;

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub format: FileFormat,
    pub size_bytes: u64,
    pub chars: usize,
    pub extracted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub location: SectionLocation,
}

/// What the next ingestion would do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PendingChanges {
    pub new_files: Vec<String>,
    pub changed_files: Vec<String>,
    pub removed_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project: String,
    pub state: IndexState,
    pub layout: Option<Layout>,
    pub context_strategy: Option<ContextStrategy>,
    pub total_chars: usize,
    pub estimated_tokens: usize,
    pub files: Vec<FileStatus>,
    pub last_run: Option<RunSummary>,
    pub pending: PendingChanges,
    pub up_to_date: bool,
    pub errors: Vec<FileError>,
}

pub fn project_status(project: &Project) -> Result<StatusReport, IngestError> {
    let manifest = Manifest::load(&project.manifest_path())?;
    let registry = ExtractorRegistry::with_defaults(project.settings.max_extract_bytes);
    let probe = Indexer::new(project, &registry).run(IngestOptions {
        dry_run: true,
        ..IngestOptions::default()
    })?;

    let pending = PendingChanges {
        new_files: probe.new_files,
        changed_files: probe.changed_files,
        removed_files: probe.removed_files,
    };
    let up_to_date = manifest.is_some()
        && pending.new_files.is_empty()
        && pending.changed_files.is_empty()
        && pending.removed_files.is_empty();

    let files = manifest
        .as_ref()
        .map(|m| {
            m.files
                .iter()
                .map(|(path, e)| FileStatus {
                    path: path.clone(),
                    format: e.format,
                    size_bytes: e.size_bytes,
                    chars: e.chars,
                    extracted_at: e.extracted_at,
                    location: e.location.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(StatusReport {
        project: project.name.clone(),
        state: IndexState::of(manifest.as_ref()),
        layout: manifest.as_ref().map(|m| m.layout),
        context_strategy: manifest.as_ref().map(|m| m.context_strategy),
        total_chars: manifest.as_ref().map(|m| m.total_chars).unwrap_or(0),
        estimated_tokens: manifest.as_ref().map(|m| m.estimated_tokens).unwrap_or(0),
        files,
        last_run: manifest.map(|m| m.summary),
        pending,
        up_to_date,
        errors: probe.errors,
    })
}

/// Run the status command: print a summary (or JSON) to stdout.
pub fn run_status(project: &Project, json: bool) -> Result<()> {
    let status = project_status(project)
        .with_context(|| format!("reading status of project {}", project.name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("xproject status: {}", status.project);
    println!("================================");
    println!();
    println!("  Root:        {}", project.root.display());
    println!("  State:       {}", status.state.as_str());
    if let Some(layout) = status.layout {
        println!("  Layout:      {}", layout);
    }
    println!(
        "  Size:        {} chars (~{} tokens)",
        format_number(status.total_chars as u64),
        format_number(status.estimated_tokens as u64)
    );
    println!("  Files:       {}", status.files.len());
    if let Some(latest) = status.files.iter().map(|f| f.extracted_at).max() {
        println!("  Last extract: {}", format_relative(latest));
    }

    if !status.files.is_empty() {
        println!();
        println!(
            "  {:<40} {:>6} {:>10} {:>10}   {}",
            "FILE", "FORMAT", "SIZE", "CHARS", "LOCATION"
        );
        println!("  {}", "-".repeat(84));
        for f in &status.files {
            let location = match &f.location {
                SectionLocation::PerFile { parsed_file } => parsed_file.clone(),
                SectionLocation::Combined {
                    start_line,
                    end_line,
                } => format!("lines {}-{}", start_line, end_line),
            };
            println!(
                "  {:<40} {:>6} {:>10} {:>10}   {}",
                f.path,
                f.format,
                format_bytes(f.size_bytes),
                format_number(f.chars as u64),
                location
            );
        }
    }

    if let Some(last) = &status.last_run {
        println!();
        println!(
            "  Last run:    {} new, {} changed, {} removed",
            last.new_files.len(),
            last.changed_files.len(),
            last.removed_files.len()
        );
    }

    println!();
    if status.up_to_date {
        println!("  Up to date.");
    } else {
        println!(
            "  Pending:     {} new, {} changed, {} removed (run `xproject ingest {}`)",
            status.pending.new_files.len(),
            status.pending.changed_files.len(),
            status.pending.removed_files.len(),
            status.project
        );
        for path in &status.pending.new_files {
            println!("    + {}", path);
        }
        for path in &status.pending.changed_files {
            println!("    ~ {}", path);
        }
        for path in &status.pending.removed_files {
            println!("    - {}", path);
        }
    }
    for err in &status.errors {
        println!("  unreadable: {}", err);
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();
    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::indexer::ingest;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn status_reports_pending_changes_until_ingested() {
        let tmp = TempDir::new().unwrap();
        let project = Project::new("acme", tmp.path(), IngestConfig::default());
        fs::create_dir_all(tmp.path().join("input")).unwrap();
        fs::write(tmp.path().join("input/a.txt"), "alpha").unwrap();

        let before = project_status(&project).unwrap();
        assert_eq!(before.state, IndexState::Uninitialized);
        assert!(!before.up_to_date);
        assert_eq!(before.pending.new_files, vec!["input/a.txt"]);

        ingest(&project, IngestOptions::default()).unwrap();
        let after = project_status(&project).unwrap();
        assert_eq!(after.state, IndexState::Full);
        assert!(after.up_to_date);
        assert_eq!(after.files.len(), 1);
        assert_eq!(after.last_run.unwrap().new_files, vec!["input/a.txt"]);

        fs::write(tmp.path().join("input/a.txt"), "alpha, revised").unwrap();
        let stale = project_status(&project).unwrap();
        assert_eq!(stale.pending.changed_files, vec!["input/a.txt"]);
        assert!(!stale.up_to_date);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
