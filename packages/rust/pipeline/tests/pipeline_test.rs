//! End-to-end pipeline tests: real storage, real HTTP via wiremock, and the
//! in-process broker driving all three stages.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pagewatch_fetch::Fetcher;
use pagewatch_pipeline::{Broker, Envelope, MemoryBroker, Message, Stages, Topic};
use pagewatch_scoring::ScoringPolicy;
use pagewatch_shared::{
    AnalysisStatus, ChangeLabel, FacetSet, FetchConfig, Job, JobId, JobStatus, PageWatchError,
    Run, RunStatus, Snapshot, SnapshotId,
};
use pagewatch_storage::Storage;

const MAX_FETCH_ATTEMPTS: u32 = 3;

struct Harness {
    storage: Arc<Storage>,
    stages: Stages,
    broker: MemoryBroker,
    server: MockServer,
    job: Job,
}

impl Harness {
    async fn new() -> Self {
        let tmp = std::env::temp_dir().join(format!("pw_pipeline_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
        let server = MockServer::start().await;

        let job = Job {
            id: JobId::new(),
            url: format!("{}/watched", server.uri()),
            name: "watched page".into(),
            schedule: "manual".into(),
            status: JobStatus::Active,
            created_at: Utc::now(),
        };
        storage.insert_job(&job).await.expect("insert job");

        let fetcher = Fetcher::new(&FetchConfig::default())
            .expect("build fetcher")
            .allow_localhost();
        let stages = Stages::new(
            storage.clone(),
            fetcher,
            ScoringPolicy::default(),
            MAX_FETCH_ATTEMPTS,
        );

        Self {
            storage,
            stages,
            broker: MemoryBroker::new(),
            server,
            job,
        }
    }

    async fn serve(&self, body: &str) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/watched"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(&self.server)
            .await;
    }

    /// Create a Pending run, publish its start message, and drive the
    /// pipeline until idle. Returns the finished run.
    async fn execute_run(&self, run: Run) -> Run {
        self.storage.insert_run(&run).await.expect("insert run");
        self.broker
            .publish(Message::StartFetch {
                job_id: self.job.id,
                run_id: run.id,
                url: self.job.url.clone(),
            })
            .await
            .expect("publish");
        self.stages.drive(&self.broker).await.expect("drive");
        self.storage
            .get_run(run.id)
            .await
            .expect("get run")
            .expect("run exists")
    }
}

#[tokio::test]
async fn first_version_completes_with_skipped_analysis() {
    let h = Harness::new().await;
    h.serve("<html><head><title>v1</title></head><body>hello</body></html>")
        .await;

    let run = h.execute_run(Run::new(h.job.id)).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.analysis_status, Some(AnalysisStatus::Skipped));
    assert!(run.analysis_score.is_none());
    assert!(run.finished_at.is_some());

    let snapshot = h
        .storage
        .get_snapshot(h.job.id, &h.job.url, 1)
        .await
        .unwrap()
        .expect("snapshot v1");
    assert_eq!(snapshot.facets.title, "v1");

    assert!(h.storage.list_changes_for_job(h.job.id).await.unwrap().is_empty());
    assert_eq!(h.broker.pending().await, 0);
}

#[tokio::test]
async fn second_version_is_scored() {
    let h = Harness::new().await;

    h.serve("<html><head><title>Pricing</title></head><body>Starter plan ten dollars</body></html>")
        .await;
    h.execute_run(Run::new(h.job.id)).await;

    h.serve("<html><head><title>Pricing</title></head><body>Starter plan twelve dollars, annual billing now available</body></html>")
        .await;
    let run = h.execute_run(Run::new(h.job.id)).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.analysis_status, Some(AnalysisStatus::Done));
    let score = run.analysis_score.expect("score recorded");
    assert!(score > 0.0 && score <= 1.0);
    assert!(run.analysis_label.is_some());

    let changes = h.storage.list_changes_for_job(h.job.id).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].previous_version, 1);
    assert_eq!(changes[0].current_version, 2);
    assert_eq!(changes[0].policy_version, 1);
    assert!((changes[0].score - score).abs() < 1e-12);
}

#[tokio::test]
async fn identical_content_scores_negligible() {
    let h = Harness::new().await;
    let body = "<html><head><title>Same</title></head><body>nothing changed here</body></html>";

    h.serve(body).await;
    h.execute_run(Run::new(h.job.id)).await;
    h.serve(body).await;
    let run = h.execute_run(Run::new(h.job.id)).await;

    assert_eq!(run.analysis_score, Some(0.0));
    assert_eq!(run.analysis_label, Some(ChangeLabel::Negligible));
}

#[tokio::test]
async fn redelivered_snapshot_ready_yields_exactly_one_change() {
    let h = Harness::new().await;

    h.serve("<html><body>one</body></html>").await;
    h.execute_run(Run::new(h.job.id)).await;
    h.serve("<html><body>two</body></html>").await;
    let run = h.execute_run(Run::new(h.job.id)).await;
    assert_eq!(run.status, RunStatus::Completed);

    let snapshot = h
        .storage
        .get_snapshot(h.job.id, &h.job.url, 2)
        .await
        .unwrap()
        .expect("snapshot v2");

    // Simulate the broker redelivering the already-processed message.
    h.broker
        .requeue(Envelope::first(Message::SnapshotReady {
            job_id: h.job.id,
            run_id: run.id,
            url: h.job.url.clone(),
            version: 2,
            snapshot_id: snapshot.id,
        }))
        .await;
    h.stages.drive(&h.broker).await.expect("drive redelivery");

    let changes = h.storage.list_changes_for_job(h.job.id).await.unwrap();
    assert_eq!(changes.len(), 1, "exactly one change, not zero, not two");

    let after = h.storage.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(after.status, RunStatus::Completed);
    assert_eq!(after.analysis_score, run.analysis_score);
    assert_eq!(h.broker.pending().await, 0);
}

#[tokio::test]
async fn expired_deadline_fails_with_timeout_reason() {
    let h = Harness::new().await;
    h.serve("<html><body>fine content</body></html>").await;

    let run = h
        .execute_run(Run::with_timeout(h.job.id, Duration::seconds(-1)))
        .await;
    assert_eq!(run.status, RunStatus::Failed);
    let reason = run.failure_reason.expect("reason recorded");
    assert!(reason.starts_with("timeout"), "got: {reason}");
    // No snapshot was taken for the dead run.
    assert!(
        h.storage
            .get_snapshot(h.job.id, &h.job.url, 1)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn permanent_fetch_error_fails_without_retry() {
    let h = Harness::new().await;
    h.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1) // no retries for a permanent error
        .mount(&h.server)
        .await;

    let run = h.execute_run(Run::new(h.job.id)).await;
    assert_eq!(run.status, RunStatus::Failed);
    let reason = run.failure_reason.expect("reason");
    assert!(reason.starts_with("fetch failed"), "got: {reason}");
    assert!(reason.contains("404"), "got: {reason}");
}

#[tokio::test]
async fn transient_fetch_errors_retry_then_fail() {
    let h = Harness::new().await;
    h.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(u64::from(MAX_FETCH_ATTEMPTS))
        .mount(&h.server)
        .await;

    let run = h.execute_run(Run::new(h.job.id)).await;
    assert_eq!(run.status, RunStatus::Failed);
    let reason = run.failure_reason.expect("reason");
    assert!(
        reason.contains(&format!("after {MAX_FETCH_ATTEMPTS} attempts")),
        "got: {reason}"
    );
    assert_eq!(h.broker.pending().await, 0);
}

#[tokio::test]
async fn transient_error_then_recovery_completes() {
    let h = Harness::new().await;
    h.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>recovered</body></html>"))
        .mount(&h.server)
        .await;

    let run = h.execute_run(Run::new(h.job.id)).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(
        h.storage
            .get_snapshot(h.job.id, &h.job.url, 1)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn missing_snapshot_at_analysis_fails_run() {
    let h = Harness::new().await;
    let run = Run::new(h.job.id);
    h.storage.insert_run(&run).await.expect("insert run");

    // A snapshot-ready message pointing at a version that was never stored.
    h.broker
        .requeue(Envelope::first(Message::SnapshotReady {
            job_id: h.job.id,
            run_id: run.id,
            url: h.job.url.clone(),
            version: 7,
            snapshot_id: SnapshotId::new(),
        }))
        .await;
    h.stages.drive(&h.broker).await.expect("drive");

    let after = h.storage.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(after.status, RunStatus::Failed);
    let reason = after.failure_reason.expect("reason recorded");
    assert!(reason.starts_with("snapshot missing"), "got: {reason}");
    assert!(reason.contains('7'), "got: {reason}");
    assert!(h.storage.list_changes_for_job(h.job.id).await.unwrap().is_empty());
    assert_eq!(h.broker.pending().await, 0);
}

#[tokio::test]
async fn storage_write_failure_requeues_without_ack() {
    let h = Harness::new().await;
    let run = Run::new(h.job.id);
    h.storage.insert_run(&run).await.expect("insert run");

    // Occupy version 1 without advancing the counter, so the parse
    // handler's snapshot insert hits the unique-key backstop.
    h.storage
        .insert_snapshot(&Snapshot {
            id: SnapshotId::new(),
            job_id: h.job.id,
            url: h.job.url.clone(),
            version: 1,
            raw: "<html></html>".into(),
            facets: FacetSet::default(),
            created_at: Utc::now(),
        })
        .await
        .expect("seed snapshot");

    h.broker
        .requeue(Envelope::first(Message::RawContent {
            job_id: h.job.id,
            run_id: run.id,
            url: h.job.url.clone(),
            content: "<html><body>new</body></html>".into(),
        }))
        .await;

    let err = h.stages.drive(&h.broker).await.unwrap_err();
    assert!(matches!(err, PageWatchError::Storage(_)), "got: {err}");

    // Not acknowledged: the delivery is back on the queue, one attempt later.
    assert_eq!(h.broker.pending().await, 1);
    let env = h.broker.next(Topic::Parse).await.unwrap().unwrap();
    assert_eq!(env.attempt, 2);

    // The run was not finalized by the failed write.
    let after = h.storage.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(after.status, RunStatus::Pending);
}

#[tokio::test]
async fn message_for_unknown_run_is_dead_lettered() {
    let h = Harness::new().await;
    h.broker
        .publish(Message::StartFetch {
            job_id: h.job.id,
            run_id: pagewatch_shared::RunId::new(),
            url: h.job.url.clone(),
        })
        .await
        .unwrap();

    h.stages.drive(&h.broker).await.expect("drive");
    assert_eq!(h.broker.dead_letters().await.len(), 1);
    assert_eq!(h.broker.pending().await, 0);
}

#[tokio::test]
async fn versions_stay_contiguous_across_runs() {
    let h = Harness::new().await;
    for i in 0..4 {
        h.serve(&format!("<html><body>revision {i}</body></html>"))
            .await;
        let run = h.execute_run(Run::new(h.job.id)).await;
        assert_eq!(run.status, RunStatus::Completed);
    }

    let versions = h.storage.list_snapshot_versions(h.job.id).await.unwrap();
    assert_eq!(
        versions.iter().map(|(v, _, _)| *v).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    let changes = h.storage.list_changes_for_job(h.job.id).await.unwrap();
    assert_eq!(changes.len(), 3);
}
