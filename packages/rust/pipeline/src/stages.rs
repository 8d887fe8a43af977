//! The three stage handlers and the in-process driver.
//!
//! Each handler is a function of (delivery, storage reads) producing
//! (storage writes, outgoing message, settlement disposition). Handlers
//! never call each other; all coordination flows through the broker.
//!
//! **Settlement rules**, uniform across stages:
//! - Run already terminal → no writes, [`Disposition::Ack`] (redelivery of
//!   settled work is expected, not an error).
//! - Run unknown → [`Disposition::DeadLetter`]; the message can never be
//!   processed.
//! - Transient fetch error with attempts remaining → [`Disposition::Retry`].
//! - Any other domain error → finalize the run Failed with a cause-specific
//!   reason, then Ack.
//! - Storage error → the error propagates and the driver settles Retry:
//!   nothing durable changed, so the message must not be acknowledged.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use pagewatch_fetch::Fetcher;
use pagewatch_parse::extract_facets;
use pagewatch_scoring::ScoringPolicy;
use pagewatch_shared::{
    AnalysisOutcome, Change, JobId, Result, Run, RunId, RunOutcome, Snapshot, SnapshotId,
};
use pagewatch_storage::{FinalizeResult, Storage};

use crate::broker::{Broker, Disposition};
use crate::message::{Envelope, Message, Topic};
use crate::run;

/// Outcome of the run-status gate every handler passes first.
enum Gate {
    /// The run is Pending; proceed with its current state.
    Proceed(Run),
    /// Settle without touching anything.
    Settle(Disposition),
}

/// The pipeline's stage handlers, sharing one storage handle, fetcher, and
/// scoring policy. All dependencies are injected at construction.
pub struct Stages {
    storage: Arc<Storage>,
    fetcher: Fetcher,
    policy: ScoringPolicy,
    max_fetch_attempts: u32,
}

impl Stages {
    pub fn new(
        storage: Arc<Storage>,
        fetcher: Fetcher,
        policy: ScoringPolicy,
        max_fetch_attempts: u32,
    ) -> Self {
        Self {
            storage,
            fetcher,
            policy,
            max_fetch_attempts: max_fetch_attempts.max(1),
        }
    }

    /// Dispatch one delivery to its stage handler.
    pub async fn handle<B: Broker>(&self, envelope: &Envelope, broker: &B) -> Result<Disposition> {
        match &envelope.message {
            Message::StartFetch {
                job_id,
                run_id,
                url,
            } => {
                self.handle_start_fetch(envelope, broker, *job_id, *run_id, url)
                    .await
            }
            Message::RawContent {
                job_id,
                run_id,
                url,
                content,
            } => {
                self.handle_raw_content(broker, *job_id, *run_id, url, content)
                    .await
            }
            Message::SnapshotReady {
                job_id,
                run_id,
                url,
                version,
                ..
            } => {
                self.handle_snapshot_ready(*job_id, *run_id, url, *version)
                    .await
            }
        }
    }

    /// Process every pending delivery until all queues are empty.
    ///
    /// Handler errors settle the triggering delivery as Retry before
    /// propagating, so a later drive sees it again.
    pub async fn drive<B: Broker>(&self, broker: &B) -> Result<()> {
        loop {
            let mut progressed = false;
            for topic in Topic::ALL {
                while let Some(envelope) = broker.next(topic).await? {
                    progressed = true;
                    match self.handle(&envelope, broker).await {
                        Ok(disposition) => broker.settle(envelope, disposition).await?,
                        Err(e) => {
                            broker.settle(envelope, Disposition::Retry).await?;
                            return Err(e);
                        }
                    }
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fetch Stage
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(run_id = %run_id, attempt = envelope.attempt))]
    async fn handle_start_fetch<B: Broker>(
        &self,
        envelope: &Envelope,
        broker: &B,
        job_id: JobId,
        run_id: RunId,
        url: &str,
    ) -> Result<Disposition> {
        let run = match self.gate(run_id).await? {
            Gate::Proceed(run) => run,
            Gate::Settle(disposition) => return Ok(disposition),
        };
        if run::deadline_exceeded(&run) {
            return self.fail(run_id, run::timeout_reason(&run)).await;
        }

        match self.fetcher.fetch(url).await {
            Ok(content) => {
                debug!(bytes = content.len(), "fetched");
                // Publish before ack so a crash in between redelivers the
                // fetch, never loses the content path.
                broker
                    .publish(Message::RawContent {
                        job_id,
                        run_id,
                        url: url.to_string(),
                        content,
                    })
                    .await?;
                Ok(Disposition::Ack)
            }
            Err(e) if e.is_transient() && envelope.attempt < self.max_fetch_attempts => {
                warn!(error = %e, "transient fetch error, will retry");
                Ok(Disposition::Retry)
            }
            Err(e) => self
                .fail(run_id, run::fetch_failure_reason(&e, envelope.attempt))
                .await,
        }
    }

    // -----------------------------------------------------------------------
    // Parse Stage
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn handle_raw_content<B: Broker>(
        &self,
        broker: &B,
        job_id: JobId,
        run_id: RunId,
        url: &str,
        content: &str,
    ) -> Result<Disposition> {
        let run = match self.gate(run_id).await? {
            Gate::Proceed(run) => run,
            Gate::Settle(disposition) => return Ok(disposition),
        };
        if run::deadline_exceeded(&run) {
            return self.fail(run_id, run::timeout_reason(&run)).await;
        }

        let facets = match extract_facets(content, url) {
            Ok(facets) => facets,
            Err(e) => return self.fail(run_id, run::parse_failure_reason(&e)).await,
        };

        let version = self.storage.allocate_version(job_id, url).await?;
        let snapshot = Snapshot {
            id: SnapshotId::new(),
            job_id,
            url: url.to_string(),
            version,
            raw: content.to_string(),
            facets,
            created_at: Utc::now(),
        };
        self.storage.insert_snapshot(&snapshot).await?;
        info!(version, "snapshot persisted");

        // Write-before-publish: the snapshot row is committed above, so a
        // consumer of this message can always load it.
        broker
            .publish(Message::SnapshotReady {
                job_id,
                run_id,
                url: url.to_string(),
                version,
                snapshot_id: snapshot.id,
            })
            .await?;
        Ok(Disposition::Ack)
    }

    // -----------------------------------------------------------------------
    // Change-Detection Stage
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(run_id = %run_id, version))]
    async fn handle_snapshot_ready(
        &self,
        job_id: JobId,
        run_id: RunId,
        url: &str,
        version: u32,
    ) -> Result<Disposition> {
        let run = match self.gate(run_id).await? {
            Gate::Proceed(run) => run,
            Gate::Settle(disposition) => return Ok(disposition),
        };
        // Deadline first, independent of snapshot availability.
        if run::deadline_exceeded(&run) {
            return self.fail(run_id, run::timeout_reason(&run)).await;
        }

        let Some(current) = self.storage.get_snapshot(job_id, url, version).await? else {
            return self
                .fail(run_id, run::snapshot_missing_reason(version))
                .await;
        };

        let previous = if version > 1 {
            self.storage.get_snapshot(job_id, url, version - 1).await?
        } else {
            None
        };

        let Some(previous) = previous else {
            debug!("first version, no comparison");
            return self
                .complete(run_id, AnalysisOutcome::Skipped)
                .await;
        };

        let scored = self.policy.score(&previous.facets, &current.facets);
        let inserted = self
            .storage
            .insert_change(&Change {
                job_id,
                previous_version: previous.version,
                current_version: version,
                score: scored.score,
                label: scored.label,
                policy_version: scored.policy_version,
                created_at: Utc::now(),
            })
            .await?;
        if !inserted {
            debug!("change already recorded for this version");
        }
        info!(score = scored.score, label = %scored.label, "change scored");

        self.complete(
            run_id,
            AnalysisOutcome::Done {
                score: scored.score,
                label: scored.label,
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    /// Load the run and decide whether the handler may proceed.
    async fn gate(&self, run_id: RunId) -> Result<Gate> {
        match self.storage.get_run(run_id).await? {
            Some(run) if run.is_terminal() => {
                debug!(status = run.status.as_str(), "run already terminal");
                Ok(Gate::Settle(Disposition::Ack))
            }
            Some(run) => Ok(Gate::Proceed(run)),
            None => {
                warn!("message references unknown run");
                Ok(Gate::Settle(Disposition::DeadLetter))
            }
        }
    }

    async fn fail(&self, run_id: RunId, reason: String) -> Result<Disposition> {
        info!(%reason, "finalizing run as failed");
        self.finalize(run_id, &RunOutcome::Failed { reason }).await
    }

    async fn complete(&self, run_id: RunId, analysis: AnalysisOutcome) -> Result<Disposition> {
        self.finalize(run_id, &RunOutcome::Completed(analysis)).await
    }

    /// Apply a terminal outcome through the storage guard. A concurrent
    /// finalization winning the race is acknowledged, not retried.
    async fn finalize(&self, run_id: RunId, outcome: &RunOutcome) -> Result<Disposition> {
        match self.storage.finalize_run(run_id, outcome).await? {
            FinalizeResult::Finalized => Ok(Disposition::Ack),
            FinalizeResult::AlreadyFinal => {
                debug!("run finalized by a concurrent handler");
                Ok(Disposition::Ack)
            }
            FinalizeResult::NotFound => {
                warn!("run vanished before finalization");
                Ok(Disposition::DeadLetter)
            }
        }
    }
}
