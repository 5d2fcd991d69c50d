//! Project directory layout.
//!
//! ```text
//! <project>/
//!   input/                         raw requirement documents
//!   changes/                       change-request sources (also ingested)
//!   output/
//!     requirements_manifest.json
//!     requirements_sections/       per-file layout artifacts
//!     requirements_context.md      combined layout artifact
//!     events.json
//!     .ingest.lock
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{Config, IngestConfig};

pub const MANIFEST_FILE: &str = "requirements_manifest.json";
pub const SECTIONS_DIR: &str = "requirements_sections";
pub const COMBINED_FILE: &str = "requirements_context.md";
pub const EVENTS_FILE: &str = "events.json";
pub const LOCK_FILE: &str = ".ingest.lock";

/// A resolved project: its root and the ingest settings that apply to it.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
    pub settings: IngestConfig,
}

impl Project {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, settings: IngestConfig) -> Self {
        Project {
            name: name.into(),
            root: root.into(),
            settings,
        }
    }

    pub fn resolve(config: &Config, project: &str) -> Self {
        let root = config.project_dir(project);
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| project.to_string());
        Project::new(name, root, config.ingest.clone())
    }

    pub fn input_dirs(&self) -> Vec<PathBuf> {
        self.settings
            .input_dirs
            .iter()
            .map(|d| self.root.join(d))
            .collect()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir().join(MANIFEST_FILE)
    }

    pub fn sections_dir(&self) -> PathBuf {
        self.output_dir().join(SECTIONS_DIR)
    }

    pub fn combined_path(&self) -> PathBuf {
        self.output_dir().join(COMBINED_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.output_dir().join(EVENTS_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.output_dir().join(LOCK_FILE)
    }

    /// Project-relative key for a file under the project root, `/`-separated.
    pub fn relative_key(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Creates the project skeleton. Idempotent.
pub fn init_project(project: &Project) -> Result<()> {
    let mut dirs = project.input_dirs();
    dirs.push(project.output_dir());
    for dir in dirs {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_input_and_output_dirs() {
        let tmp = TempDir::new().unwrap();
        let project = Project::new("acme", tmp.path().join("acme"), IngestConfig::default());
        init_project(&project).unwrap();
        init_project(&project).unwrap();

        assert!(project.root.join("input").is_dir());
        assert!(project.root.join("changes").is_dir());
        assert!(project.output_dir().is_dir());
    }

    #[test]
    fn relative_key_uses_forward_slashes() {
        let project = Project::new("acme", "/p/acme", IngestConfig::default());
        let key = project.relative_key(Path::new("/p/acme/input/specs/RFP v2.pdf"));
        assert_eq!(key, "input/specs/RFP v2.pdf");
    }

    #[test]
    fn resolve_takes_name_from_directory() {
        let cfg = Config::default();
        let project = Project::resolve(&cfg, "Acme-Portal");
        assert_eq!(project.name, "Acme-Portal");
        assert_eq!(project.root, PathBuf::from("./projects/Acme-Portal"));
    }
}
