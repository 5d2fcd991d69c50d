//! Ingest progress reporting.
//!
//! Reports observable progress during `xproject ingest` so users see what is
//! being scanned and how much is left. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingestion run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IngestProgressEvent {
    /// Walking the input directories. Total unknown.
    Discovering { project: String },
    /// Hashing listed files: n out of total.
    Fingerprinting { project: String, n: u64, total: u64 },
    /// Extracting new, changed or self-healed files: n out of total.
    Extracting { project: String, n: u64, total: u64 },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter {
    /// Emit a progress event. Called from the indexer.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest acme  extracting  3 / 12 files".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Discovering { project } => {
                format!("ingest {}  discovering...\n", project)
            }
            IngestProgressEvent::Fingerprinting { project, n, total } => format!(
                "ingest {}  fingerprinting  {} / {} files\n",
                project,
                format_number(*n),
                format_number(*total)
            ),
            IngestProgressEvent::Extracting { project, n, total } => format!(
                "ingest {}  extracting  {} / {} files\n",
                project,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Discovering { project } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "discovering"
            }),
            IngestProgressEvent::Fingerprinting { project, n, total } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "fingerprinting",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Extracting { project, n, total } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "extracting",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
