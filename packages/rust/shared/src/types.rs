//! Core domain types for the PageWatch snapshot pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version of the authoritative scoring policy. Stored on every [`Change`]
/// so labels from one formula can never be confused with another's output.
pub const SCORING_POLICY_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id! {
    /// A UUID v7 wrapper for tracked-job identifiers (time-sortable).
    JobId
}
uuid_id! {
    /// A UUID v7 wrapper for pipeline-run identifiers.
    RunId
}
uuid_id! {
    /// A UUID v7 wrapper for snapshot identifiers.
    SnapshotId
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A tracked URL with its schedule. Immutable except `status`/`schedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// The URL being tracked.
    pub url: String,
    /// Human-readable display name.
    pub name: String,
    /// Schedule descriptor, opaque to the core (e.g. "manual", a cron line).
    pub schedule: String,
    /// Whether the job is eligible for new runs.
    pub status: JobStatus,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Default absolute deadline for a run, measured from its start.
pub const DEFAULT_RUN_TIMEOUT_SECS: i64 = 300;

/// One end-to-end traversal of the pipeline, triggered by a single start
/// event. Created Pending; finalized exactly once to Completed or Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier.
    pub id: RunId,
    /// The job this run belongs to.
    pub job_id: JobId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// When the run was triggered.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Absolute deadline; any stage observing `now > timeout_at` before a
    /// terminal outcome finalizes the run as Failed.
    pub timeout_at: DateTime<Utc>,
    /// Analysis sub-status, set at finalization.
    pub analysis_status: Option<AnalysisStatus>,
    /// Change score recorded by the analysis, if performed.
    pub analysis_score: Option<f64>,
    /// Change label recorded by the analysis, if performed.
    pub analysis_label: Option<ChangeLabel>,
    /// Human-readable reason, set only when Failed.
    pub failure_reason: Option<String>,
}

impl Run {
    /// Create a new Pending run with the default deadline.
    pub fn new(job_id: JobId) -> Self {
        Self::with_timeout(job_id, Duration::seconds(DEFAULT_RUN_TIMEOUT_SECS))
    }

    /// Create a new Pending run whose deadline is `timeout` after now.
    pub fn with_timeout(job_id: JobId, timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            job_id,
            status: RunStatus::Pending,
            started_at: now,
            finished_at: None,
            timeout_at: now + timeout,
            analysis_status: None,
            analysis_score: None,
            analysis_label: None,
            failure_reason: None,
        }
    }

    /// Whether this run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Run lifecycle status. Pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and Failed permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Analysis sub-status on a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// No prior version existed; nothing to compare against.
    Skipped,
    /// Scoring ran and a Change record was written.
    Done,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Done => "done",
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skipped" => Ok(Self::Skipped),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

/// The terminal outcome a handler requests for a run. The storage layer
/// applies it only while the run is still Pending.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Success; carries the analysis result.
    Completed(AnalysisOutcome),
    /// Error or timeout; carries a human-readable reason.
    Failed { reason: String },
}

/// What the change-detection analysis produced for a completed run.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// First version for the (job, url); no comparison possible.
    Skipped,
    /// Scoring succeeded.
    Done { score: f64, label: ChangeLabel },
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A versioned content capture for a (job, url). Written once by the Parse
/// Stage; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier.
    pub id: SnapshotId,
    /// The job this snapshot belongs to.
    pub job_id: JobId,
    /// The URL that was captured.
    pub url: String,
    /// Positive, contiguous, strictly increasing per (job, url).
    pub version: u32,
    /// Raw fetched content.
    pub raw: String,
    /// Structured fields extracted from the raw content.
    pub facets: FacetSet,
    /// When the snapshot was persisted.
    pub created_at: DateTime<Utc>,
}

/// Structured fields extracted from raw content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetSet {
    /// Document title; empty when absent.
    #[serde(default)]
    pub title: String,
    /// Meta description; empty when absent.
    #[serde(default)]
    pub description: String,
    /// Body text with markup stripped and whitespace collapsed.
    #[serde(default)]
    pub text: String,
    /// Outbound links in document order.
    #[serde(default)]
    pub links: Vec<PageLink>,
}

/// A single outbound link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    /// Resolved target; may be empty for anchor-less `<a>` elements, which
    /// are excluded from scoring and diffs.
    pub href: String,
    /// Trimmed anchor text.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// The scored difference between two consecutive snapshot versions.
/// At most one per (job, current_version); absent for version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// The job this change belongs to.
    pub job_id: JobId,
    /// The older version in the comparison.
    pub previous_version: u32,
    /// The newer version in the comparison.
    pub current_version: u32,
    /// Change score in [0, 1]; 0 means identical.
    pub score: f64,
    /// Ordinal bucket derived from the score.
    pub label: ChangeLabel,
    /// Which scoring policy produced this score.
    pub policy_version: u32,
    /// When the change record was persisted.
    pub created_at: DateTime<Utc>,
}

/// Ordinal change-magnitude bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeLabel {
    Negligible,
    Low,
    Medium,
    High,
    Significant,
}

impl ChangeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negligible => "negligible",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Significant => "significant",
        }
    }
}

impl std::fmt::Display for ChangeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeLabel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "negligible" => Ok(Self::Negligible),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "significant" => Ok(Self::Significant),
            other => Err(format!("unknown change label: {other}")),
        }
    }
}
