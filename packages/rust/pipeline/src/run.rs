//! Run lifecycle helpers shared by the stage handlers.
//!
//! The state machine itself is enforced by the storage layer's guarded
//! finalize; this module owns the two things every handler repeats: the
//! deadline check and the failure-reason strings surfaced to pollers.

use chrono::Utc;
use pagewatch_shared::{PageWatchError, Run};

/// Whether the run's absolute deadline has passed.
pub fn deadline_exceeded(run: &Run) -> bool {
    Utc::now() > run.timeout_at
}

/// Failure reason for a run that blew its deadline.
pub fn timeout_reason(run: &Run) -> String {
    format!("timeout: deadline {} exceeded", run.timeout_at.to_rfc3339())
}

/// Failure reason for a fetch that exhausted its retries or hit a
/// permanent error.
pub fn fetch_failure_reason(err: &PageWatchError, attempt: u32) -> String {
    if attempt > 1 {
        format!("fetch failed after {attempt} attempts: {err}")
    } else {
        format!("fetch failed: {err}")
    }
}

/// Failure reason for a facet-extraction error.
pub fn parse_failure_reason(err: &PageWatchError) -> String {
    format!("parse failed: {err}")
}

/// Failure reason when the analysis stage cannot load the snapshot the
/// message points at.
pub fn snapshot_missing_reason(version: u32) -> String {
    format!("snapshot missing: version {version} not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pagewatch_shared::JobId;

    #[test]
    fn fresh_run_is_within_deadline() {
        let run = Run::new(JobId::new());
        assert!(!deadline_exceeded(&run));
    }

    #[test]
    fn past_deadline_is_exceeded() {
        let run = Run::with_timeout(JobId::new(), Duration::seconds(-1));
        assert!(deadline_exceeded(&run));
        assert!(timeout_reason(&run).starts_with("timeout:"));
    }

    #[test]
    fn fetch_reason_mentions_attempts_only_when_retried() {
        let err = PageWatchError::TransientFetch("connection refused".into());
        assert!(!fetch_failure_reason(&err, 1).contains("attempts"));
        assert!(fetch_failure_reason(&err, 3).contains("after 3 attempts"));
    }

    #[test]
    fn reasons_distinguish_causes() {
        let parse = parse_failure_reason(&PageWatchError::parse("no body"));
        assert!(parse.starts_with("parse failed"));
        assert_eq!(
            snapshot_missing_reason(4),
            "snapshot missing: version 4 not found"
        );
    }
}
