//! Shared types, error model, and configuration for PageWatch.
//!
//! This crate is the foundation depended on by all other PageWatch crates.
//! It provides:
//! - [`PageWatchError`] — the unified error type
//! - Domain types ([`Job`], [`Run`], [`Snapshot`], [`Change`], [`FacetSet`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, LabelThresholds, ScoringConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_scoring,
};
pub use error::{PageWatchError, Result};
pub use types::{
    AnalysisOutcome, AnalysisStatus, Change, ChangeLabel, DEFAULT_RUN_TIMEOUT_SECS, FacetSet,
    Job, JobId, JobStatus, PageLink, Run, RunId, RunOutcome, RunStatus, SCORING_POLICY_VERSION,
    Snapshot, SnapshotId,
};
