//! libSQL snapshot store for PageWatch.
//!
//! The [`Storage`] struct wraps a libSQL database holding jobs, runs,
//! versioned snapshots, change records, and the per-(job, url) version
//! counters.
//!
//! **Write rules:**
//! - Snapshots and changes are write-once; duplicates are rejected, never
//!   overwritten.
//! - Run status only moves Pending → terminal, enforced by
//!   [`Storage::finalize_run`]'s guarded update.
//! - Version numbers come exclusively from [`Storage::allocate_version`],
//!   a single-statement atomic increment. Reading `MAX(version)` and
//!   inserting `max + 1` is a race under concurrent parsers and is not
//!   offered by this API.

mod migrations;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use pagewatch_shared::{
    AnalysisOutcome, AnalysisStatus, Change, ChangeLabel, FacetSet, Job, JobId, JobStatus,
    PageWatchError, Result, Run, RunId, RunOutcome, RunStatus, Snapshot, SnapshotId,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// Result of a [`Storage::finalize_run`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeResult {
    /// The run moved from Pending to the requested terminal state.
    Finalized,
    /// The run was already terminal; nothing changed. Callers acknowledge
    /// the triggering message without further writes.
    AlreadyFinal,
    /// No run with that id exists.
    NotFound,
}

/// Aggregate statistics for a job, for the polling boundary.
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    /// Highest snapshot version stored (0 when none).
    pub total_versions: u32,
    /// Change-record count per label.
    pub label_counts: Vec<(ChangeLabel, u64)>,
    /// Mean change score across all change records.
    pub avg_score: Option<f64>,
    /// Earliest run start.
    pub first_run_at: Option<DateTime<Utc>>,
    /// Latest run start.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PageWatchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PageWatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a new job record.
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO jobs (id, url, name, schedule, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job.id.to_string(),
                    job.url.as_str(),
                    job.name.as_str(),
                    job.schedule.as_str(),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, name, schedule, status, created_at
                 FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PageWatchError::Storage(e.to_string())),
        }
    }

    /// List all jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, name, schedule, status, created_at
                 FROM jobs ORDER BY created_at DESC",
                params![],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// Update a job's status.
    pub async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Insert a new (Pending) run.
    pub async fn insert_run(&self, run: &Run) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO runs (id, job_id, status, started_at, finished_at, timeout_at,
                                   analysis_status, analysis_score, analysis_label, failure_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run.id.to_string(),
                    run.job_id.to_string(),
                    run.status.as_str(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.map(|t| t.to_rfc3339()),
                    run.timeout_at.to_rfc3339(),
                    run.analysis_status.map(|s| s.as_str()),
                    run.analysis_score,
                    run.analysis_label.map(|l| l.as_str()),
                    run.failure_reason.as_deref(),
                ],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, status, started_at, finished_at, timeout_at,
                        analysis_status, analysis_score, analysis_label, failure_reason
                 FROM runs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PageWatchError::Storage(e.to_string())),
        }
    }

    /// List runs for a job in start order.
    pub async fn list_runs_for_job(&self, job_id: JobId) -> Result<Vec<Run>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, status, started_at, finished_at, timeout_at,
                        analysis_status, analysis_score, analysis_label, failure_reason
                 FROM runs WHERE job_id = ?1 ORDER BY started_at",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    /// Move a run to a terminal state, once.
    ///
    /// The `status = 'pending'` guard makes this the idempotency point for
    /// the whole pipeline: redelivered messages for an already-terminal run
    /// observe [`FinalizeResult::AlreadyFinal`] and acknowledge without
    /// mutating anything.
    pub async fn finalize_run(&self, run_id: RunId, outcome: &RunOutcome) -> Result<FinalizeResult> {
        let now = Utc::now().to_rfc3339();

        let (status, analysis_status, score, label, reason): (
            RunStatus,
            Option<&'static str>,
            Option<f64>,
            Option<&'static str>,
            Option<String>,
        ) = match outcome {
            RunOutcome::Completed(AnalysisOutcome::Skipped) => (
                RunStatus::Completed,
                Some(AnalysisStatus::Skipped.as_str()),
                None,
                None,
                None,
            ),
            RunOutcome::Completed(AnalysisOutcome::Done { score, label }) => (
                RunStatus::Completed,
                Some(AnalysisStatus::Done.as_str()),
                Some(*score),
                Some(label.as_str()),
                None,
            ),
            RunOutcome::Failed { reason } => {
                (RunStatus::Failed, None, None, None, Some(reason.clone()))
            }
        };

        let affected = self
            .conn
            .execute(
                "UPDATE runs
                 SET status = ?1, finished_at = ?2, analysis_status = ?3,
                     analysis_score = ?4, analysis_label = ?5, failure_reason = ?6
                 WHERE id = ?7 AND status = 'pending'",
                params![
                    status.as_str(),
                    now.as_str(),
                    analysis_status,
                    score,
                    label,
                    reason.as_deref(),
                    run_id.to_string(),
                ],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        if affected > 0 {
            return Ok(FinalizeResult::Finalized);
        }

        match self.get_run(run_id).await? {
            Some(_) => Ok(FinalizeResult::AlreadyFinal),
            None => Ok(FinalizeResult::NotFound),
        }
    }

    // -----------------------------------------------------------------------
    // Version allocation
    // -----------------------------------------------------------------------

    /// Atomically allocate the next version for a (job, url).
    ///
    /// A single upsert over the dedicated counter row; concurrent callers
    /// are serialized by the database and each observes a distinct,
    /// contiguous value starting at 1.
    pub async fn allocate_version(&self, job_id: JobId, url: &str) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "INSERT INTO version_counters (job_id, url, next_version)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT(job_id, url) DO UPDATE SET next_version = next_version + 1
                 RETURNING next_version",
                params![job_id.to_string(), url],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<u32>(0)
                .map_err(|e| PageWatchError::Storage(e.to_string())),
            Ok(None) => Err(PageWatchError::Storage(
                "version allocation returned no row".into(),
            )),
            Err(e) => Err(PageWatchError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot operations
    // -----------------------------------------------------------------------

    /// Persist a snapshot. Fails on a duplicate (job, url, version) key —
    /// the backstop against misallocated versions.
    pub async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let facets_json = serde_json::to_string(&snapshot.facets)
            .map_err(|e| PageWatchError::Storage(format!("facet serialization: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO snapshots (id, job_id, url, version, raw, facets_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    snapshot.id.to_string(),
                    snapshot.job_id.to_string(),
                    snapshot.url.as_str(),
                    i64::from(snapshot.version),
                    snapshot.raw.as_str(),
                    facets_json.as_str(),
                    snapshot.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a snapshot by (job, url, version).
    pub async fn get_snapshot(
        &self,
        job_id: JobId,
        url: &str,
        version: u32,
    ) -> Result<Option<Snapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, url, version, raw, facets_json, created_at
                 FROM snapshots WHERE job_id = ?1 AND url = ?2 AND version = ?3",
                params![job_id.to_string(), url, i64::from(version)],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_snapshot(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PageWatchError::Storage(e.to_string())),
        }
    }

    /// List (version, created_at, title) for every snapshot of a job,
    /// ascending by version.
    pub async fn list_snapshot_versions(
        &self,
        job_id: JobId,
    ) -> Result<Vec<(u32, DateTime<Utc>, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT version, created_at, facets_json
                 FROM snapshots WHERE job_id = ?1 ORDER BY version",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let version = row
                .get::<u32>(0)
                .map_err(|e| PageWatchError::Storage(e.to_string()))?;
            let created_at = parse_datetime(
                &row.get::<String>(1)
                    .map_err(|e| PageWatchError::Storage(e.to_string()))?,
            )?;
            let facets: FacetSet = serde_json::from_str(
                &row.get::<String>(2)
                    .map_err(|e| PageWatchError::Storage(e.to_string()))?,
            )
            .map_err(|e| PageWatchError::Storage(format!("invalid facets: {e}")))?;
            results.push((version, created_at, facets.title));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Change operations
    // -----------------------------------------------------------------------

    /// Persist a change record. Returns `false` when a record for
    /// (job, current_version) already exists, so redelivery produces
    /// exactly one row.
    pub async fn insert_change(&self, change: &Change) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "INSERT INTO changes
                   (job_id, previous_version, current_version, score, label,
                    policy_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(job_id, current_version) DO NOTHING",
                params![
                    change.job_id.to_string(),
                    i64::from(change.previous_version),
                    i64::from(change.current_version),
                    change.score,
                    change.label.as_str(),
                    i64::from(change.policy_version),
                    change.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// List a job's change history, oldest first.
    pub async fn list_changes_for_job(&self, job_id: JobId) -> Result<Vec<Change>> {
        let mut rows = self
            .conn
            .query(
                "SELECT job_id, previous_version, current_version, score, label,
                        policy_version, created_at
                 FROM changes WHERE job_id = ?1 ORDER BY current_version",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_change(&row)?);
        }
        Ok(results)
    }

    /// Aggregate statistics for a job's versions, changes, and runs.
    pub async fn job_stats(&self, job_id: JobId) -> Result<JobStats> {
        let mut stats = JobStats::default();
        let id = job_id.to_string();

        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(version), 0) FROM snapshots WHERE job_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        if let Ok(Some(row)) = rows.next().await {
            stats.total_versions = row.get::<u32>(0).unwrap_or(0);
        }

        let mut rows = self
            .conn
            .query(
                "SELECT label, COUNT(*) FROM changes WHERE job_id = ?1 GROUP BY label",
                params![id.as_str()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        while let Ok(Some(row)) = rows.next().await {
            let label_str: String = row
                .get(0)
                .map_err(|e| PageWatchError::Storage(e.to_string()))?;
            let count: u64 = row.get::<u64>(1).unwrap_or(0);
            let label = ChangeLabel::from_str(&label_str)
                .map_err(PageWatchError::Storage)?;
            stats.label_counts.push((label, count));
        }
        stats.label_counts.sort_by_key(|(label, _)| *label);

        let mut rows = self
            .conn
            .query(
                "SELECT AVG(score) FROM changes WHERE job_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        if let Ok(Some(row)) = rows.next().await {
            stats.avg_score = row.get::<f64>(0).ok();
        }

        let mut rows = self
            .conn
            .query(
                "SELECT MIN(started_at), MAX(started_at) FROM runs WHERE job_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| PageWatchError::Storage(e.to_string()))?;
        if let Ok(Some(row)) = rows.next().await {
            stats.first_run_at = row
                .get::<String>(0)
                .ok()
                .and_then(|s| parse_datetime(&s).ok());
            stats.last_run_at = row
                .get::<String>(1)
                .ok()
                .and_then(|s| parse_datetime(&s).ok());
        }

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| PageWatchError::Storage(e.to_string()))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PageWatchError::Storage(format!("invalid date: {e}")))
}

fn row_to_job(row: &libsql::Row) -> Result<Job> {
    Ok(Job {
        id: get_string(row, 0)?
            .parse()
            .map_err(|e: uuid::Error| PageWatchError::Storage(e.to_string()))?,
        url: get_string(row, 1)?,
        name: get_string(row, 2)?,
        schedule: get_string(row, 3)?,
        status: JobStatus::from_str(&get_string(row, 4)?).map_err(PageWatchError::Storage)?,
        created_at: parse_datetime(&get_string(row, 5)?)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<Run> {
    Ok(Run {
        id: get_string(row, 0)?
            .parse()
            .map_err(|e: uuid::Error| PageWatchError::Storage(e.to_string()))?,
        job_id: get_string(row, 1)?
            .parse()
            .map_err(|e: uuid::Error| PageWatchError::Storage(e.to_string()))?,
        status: RunStatus::from_str(&get_string(row, 2)?).map_err(PageWatchError::Storage)?,
        started_at: parse_datetime(&get_string(row, 3)?)?,
        finished_at: row
            .get::<String>(4)
            .ok()
            .map(|s| parse_datetime(&s))
            .transpose()?,
        timeout_at: parse_datetime(&get_string(row, 5)?)?,
        analysis_status: row
            .get::<String>(6)
            .ok()
            .map(|s| AnalysisStatus::from_str(&s).map_err(PageWatchError::Storage))
            .transpose()?,
        analysis_score: row.get::<f64>(7).ok(),
        analysis_label: row
            .get::<String>(8)
            .ok()
            .map(|s| ChangeLabel::from_str(&s).map_err(PageWatchError::Storage))
            .transpose()?,
        failure_reason: row.get::<String>(9).ok(),
    })
}

fn row_to_snapshot(row: &libsql::Row) -> Result<Snapshot> {
    let facets: FacetSet = serde_json::from_str(&get_string(row, 5)?)
        .map_err(|e| PageWatchError::Storage(format!("invalid facets: {e}")))?;
    Ok(Snapshot {
        id: get_string(row, 0)?
            .parse::<uuid::Uuid>()
            .map(SnapshotId)
            .map_err(|e| PageWatchError::Storage(e.to_string()))?,
        job_id: get_string(row, 1)?
            .parse()
            .map_err(|e: uuid::Error| PageWatchError::Storage(e.to_string()))?,
        url: get_string(row, 2)?,
        version: row
            .get::<u32>(3)
            .map_err(|e| PageWatchError::Storage(e.to_string()))?,
        raw: get_string(row, 4)?,
        facets,
        created_at: parse_datetime(&get_string(row, 6)?)?,
    })
}

fn row_to_change(row: &libsql::Row) -> Result<Change> {
    Ok(Change {
        job_id: get_string(row, 0)?
            .parse()
            .map_err(|e: uuid::Error| PageWatchError::Storage(e.to_string()))?,
        previous_version: row
            .get::<u32>(1)
            .map_err(|e| PageWatchError::Storage(e.to_string()))?,
        current_version: row
            .get::<u32>(2)
            .map_err(|e| PageWatchError::Storage(e.to_string()))?,
        score: row
            .get::<f64>(3)
            .map_err(|e| PageWatchError::Storage(e.to_string()))?,
        label: ChangeLabel::from_str(&get_string(row, 4)?).map_err(PageWatchError::Storage)?,
        policy_version: row
            .get::<u32>(5)
            .map_err(|e| PageWatchError::Storage(e.to_string()))?,
        created_at: parse_datetime(&get_string(row, 6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pagewatch_shared::PageLink;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("pw_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn make_job() -> Job {
        Job {
            id: JobId::new(),
            url: "https://example.com/pricing".into(),
            name: "pricing page".into(),
            schedule: "manual".into(),
            status: JobStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn make_snapshot(job_id: JobId, url: &str, version: u32) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(),
            job_id,
            url: url.into(),
            version,
            raw: "<html><body>hello</body></html>".into(),
            facets: FacetSet {
                title: format!("v{version}"),
                description: String::new(),
                text: "hello".into(),
                links: vec![PageLink {
                    href: "https://example.com/a".into(),
                    text: "A".into(),
                }],
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn job_crud() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.expect("insert job");

        let found = storage.get_job(job.id).await.expect("get job");
        let found = found.expect("job exists");
        assert_eq!(found.name, "pricing page");
        assert_eq!(found.status, JobStatus::Active);

        storage
            .set_job_status(job.id, JobStatus::Paused)
            .await
            .expect("set status");
        let found = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Paused);

        assert_eq!(storage.list_jobs().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn run_finalize_is_once_only() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        let run = Run::new(job.id);
        storage.insert_run(&run).await.expect("insert run");

        let outcome = RunOutcome::Completed(AnalysisOutcome::Done {
            score: 0.25,
            label: ChangeLabel::Medium,
        });
        let first = storage.finalize_run(run.id, &outcome).await.expect("finalize");
        assert_eq!(first, FinalizeResult::Finalized);

        // Redelivery: a competing Failed outcome must not win.
        let second = storage
            .finalize_run(
                run.id,
                &RunOutcome::Failed {
                    reason: "late duplicate".into(),
                },
            )
            .await
            .expect("second finalize");
        assert_eq!(second, FinalizeResult::AlreadyFinal);

        let stored = storage.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.analysis_status, Some(AnalysisStatus::Done));
        assert_eq!(stored.analysis_score, Some(0.25));
        assert_eq!(stored.analysis_label, Some(ChangeLabel::Medium));
        assert!(stored.failure_reason.is_none());
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn finalize_missing_run() {
        let storage = test_storage().await;
        let result = storage
            .finalize_run(
                RunId::new(),
                &RunOutcome::Failed {
                    reason: "nope".into(),
                },
            )
            .await
            .expect("finalize");
        assert_eq!(result, FinalizeResult::NotFound);
    }

    #[tokio::test]
    async fn version_allocation_is_sequential() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        for expected in 1..=5u32 {
            let v = storage
                .allocate_version(job.id, &job.url)
                .await
                .expect("allocate");
            assert_eq!(v, expected);
        }

        // Separate URL gets its own sequence.
        let v = storage
            .allocate_version(job.id, "https://example.com/other")
            .await
            .unwrap();
        assert_eq!(v, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocation_yields_contiguous_versions() {
        let storage = Arc::new(test_storage().await);
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let storage = storage.clone();
            let job_id = job.id;
            let url = job.url.clone();
            handles.push(tokio::spawn(async move {
                storage.allocate_version(job_id, &url).await
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.expect("join").expect("allocate"));
        }

        versions.sort_unstable();
        let expected: Vec<u32> = (1..=32).collect();
        assert_eq!(versions, expected, "versions must be 1..N, no gaps or dups");
    }

    #[tokio::test]
    async fn snapshot_insert_rejects_duplicates() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        let snap = make_snapshot(job.id, &job.url, 1);
        storage.insert_snapshot(&snap).await.expect("first insert");

        let mut dup = make_snapshot(job.id, &job.url, 1);
        dup.raw = "<html>other</html>".into();
        let result = storage.insert_snapshot(&dup).await;
        assert!(result.is_err(), "duplicate (job, url, version) must fail");

        // Original content untouched
        let stored = storage
            .get_snapshot(job.id, &job.url, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.raw, snap.raw);
        assert_eq!(stored.facets, snap.facets);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_and_listing() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        for version in 1..=3u32 {
            storage
                .insert_snapshot(&make_snapshot(job.id, &job.url, version))
                .await
                .unwrap();
        }

        let versions = storage.list_snapshot_versions(job.id).await.expect("list");
        assert_eq!(
            versions.iter().map(|(v, _, _)| *v).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(versions[1].2, "v2");
    }

    #[tokio::test]
    async fn change_insert_is_idempotent() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        let change = Change {
            job_id: job.id,
            previous_version: 1,
            current_version: 2,
            score: 0.42,
            label: ChangeLabel::High,
            policy_version: 1,
            created_at: Utc::now(),
        };

        assert!(storage.insert_change(&change).await.expect("first"));
        assert!(!storage.insert_change(&change).await.expect("duplicate"));

        let changes = storage.list_changes_for_job(job.id).await.expect("list");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].current_version, 2);
        assert_eq!(changes[0].label, ChangeLabel::High);
        assert_eq!(changes[0].policy_version, 1);
    }

    #[tokio::test]
    async fn job_stats_aggregates() {
        let storage = test_storage().await;
        let job = make_job();
        storage.insert_job(&job).await.unwrap();

        for version in 1..=3u32 {
            storage
                .insert_snapshot(&make_snapshot(job.id, &job.url, version))
                .await
                .unwrap();
        }
        for (prev, curr, score, label) in [
            (1u32, 2u32, 0.1, ChangeLabel::Low),
            (2, 3, 0.5, ChangeLabel::High),
        ] {
            storage
                .insert_change(&Change {
                    job_id: job.id,
                    previous_version: prev,
                    current_version: curr,
                    score,
                    label,
                    policy_version: 1,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let run = Run::new(job.id);
        storage.insert_run(&run).await.unwrap();

        let stats = storage.job_stats(job.id).await.expect("stats");
        assert_eq!(stats.total_versions, 3);
        assert_eq!(
            stats.label_counts,
            vec![(ChangeLabel::Low, 1), (ChangeLabel::High, 1)]
        );
        let avg = stats.avg_score.expect("avg");
        assert!((avg - 0.3).abs() < 1e-9);
        assert!(stats.first_run_at.is_some());
    }
}
