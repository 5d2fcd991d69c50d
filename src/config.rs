use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

/// Default combined-size trigger for the `sectioned` strategy: ~150K tokens
/// at 4 chars/token.
pub const DEFAULT_THRESHOLD_CHARS: usize = 600_000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub projects: ProjectsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectsConfig {
    #[serde(default = "default_projects_root")]
    pub root: PathBuf,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            root: default_projects_root(),
        }
    }
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("./projects")
}

/// Physical arrangement of the corpus. Fixed per project at first ingestion.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayoutConfig {
    #[default]
    PerFile,
    Combined,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Project-relative directories scanned for inputs, in priority order.
    #[serde(default = "default_input_dirs")]
    pub input_dirs: Vec<String>,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default = "default_threshold_chars")]
    pub threshold_chars: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dirs: default_input_dirs(),
            layout: LayoutConfig::default(),
            threshold_chars: default_threshold_chars(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_extract_bytes: default_max_extract_bytes(),
        }
    }
}

fn default_input_dirs() -> Vec<String> {
    vec!["input".to_string(), "changes".to_string()]
}
fn default_threshold_chars() -> usize {
    DEFAULT_THRESHOLD_CHARS
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_extract_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Config {
    /// Resolves a project name (or an absolute path) to its directory.
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects.root.join(project)
    }
}

/// Loads the config file, or returns defaults when the file does not exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let ingest = &config.ingest;

    if ingest.threshold_chars == 0 {
        anyhow::bail!("ingest.threshold_chars must be > 0");
    }
    if ingest.max_extract_bytes == 0 {
        anyhow::bail!("ingest.max_extract_bytes must be > 0");
    }
    if ingest.input_dirs.is_empty() {
        anyhow::bail!("ingest.input_dirs must list at least one directory");
    }
    for dir in &ingest.input_dirs {
        let p = Path::new(dir);
        let escapes = p.is_absolute()
            || p
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
        if dir.trim().is_empty() || escapes {
            anyhow::bail!(
                "ingest.input_dirs entry '{}' must be a relative path inside the project",
                dir
            );
        }
    }
    for pattern in ingest.include_globs.iter().chain(&ingest.exclude_globs) {
        Glob::new(pattern).with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
    }

    Ok(())
}
