//! Section retrieval by source path.
//!
//! Downstream steps read one input's text without loading the whole corpus
//! into their context: the manifest says where the section lives and this
//! module fetches exactly that. Used by `xproject section`.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::corpus::{read_artifact, CombinedCorpus};
use crate::error::IngestError;
use crate::manifest::{Manifest, SectionLocation};
use crate::models::FileFormat;
use crate::project::Project;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionResponse {
    pub path: String,
    pub format: FileFormat,
    pub text: String,
    #[serde(flatten)]
    pub location: SectionLocation,
}

/// Looks the path up in the manifest and reads its text from the corpus.
///
/// For the combined layout the whole corpus is verified against the
/// manifest before slicing, so a stale corpus is an error rather than the
/// wrong lines.
pub fn read_section(project: &Project, path: &str) -> Result<SectionResponse, IngestError> {
    let manifest = Manifest::load(&project.manifest_path())?
        .ok_or_else(|| IngestError::UnknownSection(path.to_string()))?;
    let key = path.replace('\\', "/");
    let entry = manifest
        .files
        .get(&key)
        .ok_or_else(|| IngestError::UnknownSection(key.clone()))?;

    let text = match &entry.location {
        SectionLocation::PerFile { parsed_file } => {
            read_artifact(&project.sections_dir(), parsed_file)?
        }
        SectionLocation::Combined { .. } => {
            let combined = project.combined_path();
            CombinedCorpus::load(&combined, &manifest)?
                .slice(&key)
                .ok_or_else(|| IngestError::CorpusOutOfSync {
                    path: combined.clone(),
                    reason: format!("no block for {}", key),
                })?
        }
    };

    Ok(SectionResponse {
        path: key.clone(),
        format: entry.format,
        text,
        location: entry.location.clone(),
    })
}

/// CLI entry point: print the section text (or JSON) to stdout.
pub fn run_section(project: &Project, path: &str, json: bool) -> Result<()> {
    let section = read_section(project, path)
        .with_context(|| format!("reading section {} of project {}", path, project.name))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&section)?);
    } else {
        println!("{}", section.text);
    }
    Ok(())
}
