//! # xproject-ingest
//!
//! Incremental ingestion and source indexing for client requirement
//! documents.
//!
//! A project's input directories (`input/` and `changes/`) hold an evolving
//! set of heterogeneous documents. Each ingestion run fingerprints them,
//! extracts text only from what is new or changed, and keeps an addressable
//! corpus plus a manifest that downstream steps use to read single sections
//! without reprocessing everything.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────────────┐
//! │ input dirs  │──▶│ scan + hash  │──▶│  classify │──▶│ extract new and   │
//! │ (walkdir)   │   │ (sha2)       │   │ (manifest)│   │ changed (registry)│
//! └─────────────┘   └──────────────┘   └───────────┘   └────────┬─────────┘
//!                                                               ▼
//!                      ┌──────────────────┐        ┌────────────────────────┐
//!                      │ manifest.json    │◀───────│ corpus: per-file .md or │
//!                      │ (atomic rename)  │ second │ combined + line offsets │
//!                      └──────────────────┘        └────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! xproject init Acme-Portal
//! xproject ingest Acme-Portal
//! xproject status Acme-Portal
//! xproject section Acme-Portal input/rfp.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`project`] | Project directory layout |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content hashing |
//! | [`scan`] | Input discovery |
//! | [`extract`] | Per-format text extraction |
//! | [`manifest`] | The persisted ingestion record and delta classification |
//! | [`corpus`] | Per-file and combined corpus artifacts |
//! | [`indexer`] | One ingestion run |
//! | [`ingest`] | `ingest` command output |
//! | [`status`] | `status` command |
//! | [`section`] | Section lookup |
//! | [`events`] | Project event log |
//! | [`lock`] | Per-project run lock |
//! | [`progress`] | stderr progress reporting |
//! | [`error`] | Error types |

pub mod config;
pub mod corpus;
pub mod error;
pub mod events;
pub mod extract;
pub mod fingerprint;
pub mod indexer;
pub mod ingest;
pub mod lock;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod project;
pub mod scan;
pub mod section;
pub mod status;

pub use error::{FileError, FileErrorKind, IngestError};
pub use indexer::{ingest as ingest_project, IngestOptions, IngestReport, Indexer};
