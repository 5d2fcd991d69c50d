//! `xproject ingest`: run the indexer for one project and print the summary.
//!
//! The run itself lives in [`crate::indexer`]; this module owns the
//! operator-facing output and the exit status. Per-file errors do not stop
//! the run but make the command exit non-zero.

use anyhow::{Context, Result};

use crate::extract::ExtractorRegistry;
use crate::indexer::{IngestOptions, IngestReport, Indexer};
use crate::progress::{format_number, ProgressMode};
use crate::project::Project;

/// Runs ingestion and prints the report. Returns `true` when every file
/// was processed without error.
pub fn run_ingest(
    project: &Project,
    options: IngestOptions,
    json: bool,
    progress: ProgressMode,
) -> Result<bool> {
    let registry = ExtractorRegistry::with_defaults(project.settings.max_extract_bytes);
    let reporter = progress.reporter();
    let report = Indexer::new(project, &registry)
        .with_progress(reporter.as_ref())
        .run(options)
        .with_context(|| format!("ingesting project {}", project.name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(!report.has_errors())
}

fn print_report(report: &IngestReport) {
    if report.dry_run {
        println!("ingest {} (dry-run)", report.project);
    } else {
        println!("ingest {}", report.project);
    }
    println!("  new: {}", report.added_count());
    for path in &report.new_files {
        println!("    + {}", path);
    }
    println!("  changed: {}", report.changed_count());
    for path in &report.changed_files {
        println!("    ~ {}", path);
    }
    println!("  removed: {}", report.removed_count());
    for path in &report.removed_files {
        println!("    - {}", path);
    }
    println!("  unchanged: {}", report.unchanged);
    if !report.healed.is_empty() {
        println!("  rebuilt from source: {}", report.healed.len());
    }
    println!("  layout: {}", report.layout);
    if report.escalated {
        println!("  context strategy: {} (escalated)", report.context_strategy);
    } else {
        println!("  context strategy: {}", report.context_strategy);
    }
    println!(
        "  total: {} chars (~{} tokens)",
        format_number(report.total_chars as u64),
        format_number(report.estimated_tokens as u64)
    );

    if report.has_errors() {
        println!("  errors: {}", report.errors.len());
        for err in &report.errors {
            println!("    ! {}", err);
        }
    } else {
        println!("ok");
    }
}
