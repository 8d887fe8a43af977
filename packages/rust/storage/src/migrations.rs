//! SQL migration definitions for the PageWatch database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: jobs, runs, version_counters, snapshots, changes",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tracked URLs
CREATE TABLE IF NOT EXISTS jobs (
    id         TEXT PRIMARY KEY,
    url        TEXT NOT NULL,
    name       TEXT NOT NULL,
    schedule   TEXT NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- One row per pipeline traversal; status guarded by finalize_run
CREATE TABLE IF NOT EXISTS runs (
    id              TEXT PRIMARY KEY,
    job_id          TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    status          TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    finished_at     TEXT,
    timeout_at      TEXT NOT NULL,
    analysis_status TEXT,
    analysis_score  REAL,
    analysis_label  TEXT,
    failure_reason  TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_job_id ON runs(job_id);

-- Per-(job, url) version sequence; the single contended row.
-- Updated only via the atomic upsert in allocate_version.
CREATE TABLE IF NOT EXISTS version_counters (
    job_id       TEXT NOT NULL,
    url          TEXT NOT NULL,
    next_version INTEGER NOT NULL,
    PRIMARY KEY (job_id, url)
);

-- Versioned content captures; write-once
CREATE TABLE IF NOT EXISTS snapshots (
    id          TEXT PRIMARY KEY,
    job_id      TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    url         TEXT NOT NULL,
    version     INTEGER NOT NULL,
    raw         TEXT NOT NULL,
    facets_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (job_id, url, version)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_job_url ON snapshots(job_id, url);

-- Scored differences between consecutive versions; at most one per
-- (job, current_version)
CREATE TABLE IF NOT EXISTS changes (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id           TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    previous_version INTEGER NOT NULL,
    current_version  INTEGER NOT NULL,
    score            REAL NOT NULL,
    label            TEXT NOT NULL,
    policy_version   INTEGER NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE (job_id, current_version)
);

CREATE INDEX IF NOT EXISTS idx_changes_job_id ON changes(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
