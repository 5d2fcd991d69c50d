//! Project event log (`output/events.json`).
//!
//! An auxiliary timeline for humans and agents: a JSON array with one record
//! per completed ingestion. It is never read back as state, so a missing or
//! unreadable log is simply started over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::IngestError;
use crate::manifest::{write_atomic, ContextStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesIngested {
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub errors: usize,
    pub context_strategy: ContextStrategy,
}

pub fn read_events(path: &Path) -> Vec<Event> {
    let Ok(bytes) = std::fs::read(path) else {
        return Vec::new();
    };
    match serde_json::from_slice(&bytes) {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "event log unreadable, starting a new one"
            );
            Vec::new()
        }
    }
}

pub fn append_event(path: &Path, kind: &str, data: impl Serialize) -> Result<(), IngestError> {
    let data = serde_json::to_value(data)
        .map_err(|e| IngestError::persistence(path, std::io::Error::other(e)))?;
    let mut events = read_events(path);
    events.push(Event {
        kind: kind.to_string(),
        timestamp: Utc::now(),
        data,
    });
    let bytes = serde_json::to_vec_pretty(&events)
        .map_err(|e| IngestError::persistence(path, std::io::Error::other(e)))?;
    write_atomic(path, &bytes)
}

/// Appends a `files_ingested` record; failures are logged and swallowed.
pub fn record_ingestion(path: &Path, record: FilesIngested) {
    if let Err(err) = append_event(path, "files_ingested", record) {
        tracing::warn!(error = %err, "could not append to event log");
    }
}
