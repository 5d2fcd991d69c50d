//! # xproject CLI
//!
//! The `xproject` binary drives incremental ingestion of a project's
//! requirement documents into an addressable text corpus.
//!
//! ## Usage
//!
//! ```bash
//! xproject --config ./config/xproject.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `xproject init <project>` | Create the project's `input/`, `changes/` and `output/` directories |
//! | `xproject ingest <project>` | Ingest new and changed inputs, drop removed ones |
//! | `xproject status <project>` | Show what is ingested and whether a re-ingest is pending |
//! | `xproject section <project> <path>` | Print one input's extracted text |
//!
//! ## Examples
//!
//! ```bash
//! # Set up a project and drop the client's documents into it
//! xproject init Acme-Portal
//! cp ~/Downloads/rfp.pdf projects/Acme-Portal/input/
//!
//! # Ingest; re-running only processes what changed
//! xproject ingest Acme-Portal
//!
//! # Read a single section back by manifest lookup
//! xproject section Acme-Portal input/rfp.pdf
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use xproject_ingest::config;
use xproject_ingest::indexer::IngestOptions;
use xproject_ingest::ingest;
use xproject_ingest::progress::ProgressMode;
use xproject_ingest::project::{self, Project};
use xproject_ingest::section;
use xproject_ingest::status;

/// xproject: incremental ingestion of client requirement documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults apply.
#[derive(Parser)]
#[command(
    name = "xproject",
    about = "Incremental ingestion and source indexing for requirement documents",
    version,
    long_about = "xproject turns a project's evolving set of input documents (PDF, DOCX, XLSX, \
    email, CSV, text, images) into a stable, addressable text corpus and a manifest that \
    downstream steps use for targeted partial reads. Re-running ingest only processes what changed."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/xproject.toml`; missing file means defaults.
    #[arg(long, global = true, default_value = "./config/xproject.toml")]
    config: PathBuf,

    /// Increase log verbosity on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the project directory skeleton.
    ///
    /// Creates `input/`, `changes/` and `output/` under the project root.
    /// Safe to run repeatedly.
    Init {
        /// Project name (resolved under `[projects].root`) or path.
        project: String,
    },

    /// Ingest a project's input documents.
    ///
    /// Fingerprints every input, extracts only new and changed files, removes
    /// sections of deleted files, and rewrites the manifest. Exits with status
    /// 1 when any file failed, after completing the run for all others.
    Ingest {
        /// Project name (resolved under `[projects].root`) or path.
        project: String,

        /// Re-extract every input and rebuild the corpus from scratch.
        #[arg(long)]
        full: bool,

        /// Dry run: show the delta without extracting or writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Default: human when stderr is a TTY, otherwise off.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show ingestion state and pending changes.
    Status {
        /// Project name (resolved under `[projects].root`) or path.
        project: String,

        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one section's extracted text.
    ///
    /// The section is located through the manifest only, so this reads
    /// exactly one section's lines from the corpus.
    Section {
        /// Project name (resolved under `[projects].root`) or path.
        project: String,

        /// Project-relative input path, e.g. `input/rfp.pdf`.
        path: String,

        /// Print the section with its location as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(value: ProgressArg) -> Self {
        match value {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init { project } => {
            let project = Project::resolve(&cfg, &project);
            project::init_project(&project)?;
            println!("Project {} initialized at {}", project.name, project.root.display());
        }
        Commands::Ingest {
            project,
            full,
            dry_run,
            json,
            progress,
        } => {
            let project = Project::resolve(&cfg, &project);
            let progress = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let options = IngestOptions { full, dry_run };
            let clean = ingest::run_ingest(&project, options, json, progress)?;
            if !clean {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Status { project, json } => {
            let project = Project::resolve(&cfg, &project);
            status::run_status(&project, json)?;
        }
        Commands::Section {
            project,
            path,
            json,
        } => {
            let project = Project::resolve(&cfg, &project);
            section::run_section(&project, &path, json)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
