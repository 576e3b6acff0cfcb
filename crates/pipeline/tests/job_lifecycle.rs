//! End-to-end job lifecycle against a recording fake provisioner.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use dbforge_core::config::{Backend, BackendConfig, PipelineConfig, PG_MAX_CHANNEL_PREFIX_LEN};
use dbforge_core::error::CoreError;
use dbforge_core::job::{Engine, JobResult, JobStatus};
use dbforge_core::job_events::EventKind;
use dbforge_db::StoreError;
use dbforge_pipeline::{QueueError, Services, ServicesError, SubmitError, SubmitOutcome, SubmitSchema};

use common::{
    config, drain_events, Call, ClosedQueue, FakeProvisioner, Harness, SuccessRejectingStore, SCHEMA,
};

fn request(h: &Harness, db_name: &str, contents: &str) -> SubmitSchema {
    SubmitSchema {
        engine: Engine::Mysql,
        db_name: db_name.into(),
        schema_path: h.upload(contents),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_creates_applies_and_completes() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let req = request(&h, "shop", SCHEMA);
    let payload = req.schema_path.clone();

    let outcome = h.submissions.submit(req).await.unwrap();
    assert_matches!(outcome, SubmitOutcome::Queued { .. });
    let id = outcome.job_id();

    let queued = h.services.store.get(id).await.unwrap().unwrap();
    assert_eq!(queued.status, JobStatus::Queued);

    let mut sub = h.subscribe(id).await;
    assert_eq!(h.dequeue().await, id);
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.progress, 100);
    assert_eq!(job.stage.as_deref(), Some("completed"));
    assert_eq!(
        job.result,
        Some(JobResult {
            created_db: true,
            applied: true,
            dry_run: false
        })
    );
    assert!(job.error.is_none());
    assert!(job.finished_at.is_some());
    assert_eq!(
        h.fake.calls(),
        [
            Call::Exists("shop".into()),
            Call::Create("shop".into()),
            Call::Apply("shop".into()),
        ]
    );
    assert!(h.fake.has_database("shop"));
    assert!(!payload.exists(), "payload is deleted after apply");

    let stored = h.services.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored, job);

    let events = drain_events(&mut sub).await;
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Done));
    assert!(events[..events.len() - 1].iter().all(|e| e.kind == EventKind::Progress));
}

#[tokio::test]
async fn forbidden_keyword_fails_without_touching_the_server() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let req = request(&h, "shop", "CREATE TABLE t (id INT);\ndrop table t;\n");

    let id = h.submissions.submit(req).await.unwrap().job_id();
    let mut sub = h.subscribe(id).await;
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Forbidden SQL keyword detected: DROP"));
    assert_eq!(job.progress, 100);
    assert!(job.result.is_none());
    assert!(h.fake.calls().is_empty());

    let events = drain_events(&mut sub).await;
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Failed));
}

#[tokio::test]
async fn existing_database_fails_without_cleanup() {
    let h = Harness::new(config(), FakeProvisioner::default().with_database("shop"));
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Database 'shop' already exists"));
    assert_eq!(h.fake.calls(), [Call::Exists("shop".into())]);
    assert!(h.fake.has_database("shop"), "pre-existing database is never dropped");
}

#[tokio::test]
async fn existing_database_is_reused_when_allowed() {
    let cfg = PipelineConfig {
        fail_if_exists: false,
        ..config()
    };
    let h = Harness::new(cfg, FakeProvisioner::default().with_database("shop").failing_apply());
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        h.fake.calls(),
        [Call::Exists("shop".into()), Call::Apply("shop".into())]
    );
    assert!(h.fake.has_database("shop"), "a database this job did not create survives");
}

#[tokio::test]
async fn apply_failure_after_create_drops_the_database() {
    let h = Harness::new(config(), FakeProvisioner::default().failing_apply());
    let req = request(&h, "shop", SCHEMA);
    let payload = req.schema_path.clone();
    let id = h.submissions.submit(req).await.unwrap().job_id();
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("partially applied"));
    assert_eq!(
        h.fake.calls(),
        [
            Call::Exists("shop".into()),
            Call::Create("shop".into()),
            Call::Apply("shop".into()),
            Call::Drop("shop".into()),
        ]
    );
    assert!(!h.fake.has_database("shop"));
    assert!(payload.exists(), "payload is kept when the job fails");
}

#[tokio::test]
async fn apply_failure_keeps_database_when_drop_disabled() {
    let cfg = PipelineConfig {
        drop_on_failure: false,
        ..config()
    };
    let h = Harness::new(cfg, FakeProvisioner::default().failing_apply());
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(h.fake.has_database("shop"));
    assert!(!h.fake.calls().contains(&Call::Drop("shop".into())));
}

#[tokio::test]
async fn cleanup_failure_keeps_the_original_error() {
    let h = Harness::new(
        config(),
        FakeProvisioner::default().failing_apply().failing_drop(),
    );
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("partially applied"), "{error}");
    assert!(!error.contains("server went away"), "{error}");
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_db_name_creates_nothing() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let too_long = "a".repeat(101);

    for name in ["", "shop-1", "a b", "x;DROP", too_long.as_str()] {
        let err = h.submissions.submit(request(&h, name, SCHEMA)).await.unwrap_err();
        assert_matches!(err, SubmitError::Validation(CoreError::Validation(_)));
    }

    assert_eq!(h.record_count(), 0);
    assert!(h.queue_is_empty().await);
}

#[tokio::test]
async fn published_progress_never_decreases() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let id = h.submissions.submit(request(&h, "shop", &SCHEMA.repeat(50))).await.unwrap().job_id();
    let mut sub = h.subscribe(id).await;
    h.dequeue().await;
    h.processor.process(id).await.unwrap();

    let progress: Vec<u8> = drain_events(&mut sub).await.iter().map(|e| e.job.progress).collect();
    assert!(progress.len() >= 5, "{progress:?}");
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.first(), Some(&1));
    assert_eq!(progress.last(), Some(&100));
    assert!(
        progress.iter().any(|p| (36..=95).contains(p)),
        "apply progress is reported: {progress:?}"
    );
}

#[tokio::test]
async fn duplicate_content_returns_prior_job() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let first = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    h.processor.process(first).await.unwrap();
    let calls_after_first = h.fake.calls();

    let again = request(&h, "shop_copy", SCHEMA);
    let upload = again.schema_path.clone();
    let outcome = h.submissions.submit(again).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Deduplicated {
            job_id: first,
            deduplicated: true
        }
    );
    assert_eq!(h.fake.calls(), calls_after_first);
    assert!(h.queue_is_empty().await);
    assert!(!upload.exists(), "duplicate upload is discarded");
}

#[tokio::test]
async fn failed_job_does_not_dedup() {
    let h = Harness::new(config(), FakeProvisioner::default().with_database("shop"));
    let first = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    h.processor.process(first).await.unwrap();

    let second = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap();
    assert_matches!(second, SubmitOutcome::Queued { job_id } if job_id != first);
}

#[tokio::test]
async fn dry_run_never_touches_the_server() {
    let cfg = PipelineConfig {
        dry_run: true,
        ..config()
    };
    let h = Harness::new(cfg, FakeProvisioner::default());
    let req = request(&h, "shop", SCHEMA);
    let payload = req.schema_path.clone();

    let outcome = h.submissions.submit(req).await.unwrap();
    assert_matches!(outcome, SubmitOutcome::DryRun { dry_run: true, .. });
    let id = outcome.job_id();

    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.progress, 100);
    assert_eq!(job.result, Some(JobResult::dry_run()));
    assert!(h.fake.calls().is_empty());
    assert!(payload.exists());
}

#[tokio::test]
async fn dry_run_still_rejects_forbidden_content() {
    let cfg = PipelineConfig {
        dry_run: true,
        ..config()
    };
    let h = Harness::new(cfg, FakeProvisioner::default());
    let id = h.submissions.submit(request(&h, "shop", "TRUNCATE t;")).await.unwrap().job_id();
    h.dequeue().await;
    let job = h.processor.process(id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(h.fake.calls().is_empty());
}

#[tokio::test]
async fn redelivered_terminal_job_is_skipped() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    let done = h.processor.process(id).await.unwrap().unwrap();
    let calls = h.fake.calls();

    let again = h.processor.process(id).await.unwrap().unwrap();
    assert_eq!(again, done);
    assert_eq!(h.fake.calls(), calls);
}

#[tokio::test]
async fn unknown_job_id_is_ignored() {
    let h = Harness::new(config(), FakeProvisioner::default());
    assert!(h.processor.process(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Store and queue failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_failure_leaves_no_record() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let submissions = Services {
        queue: Arc::new(ClosedQueue),
        ..h.services.clone()
    }
    .submissions();

    let err = submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap_err();

    assert_matches!(err, SubmitError::Queue(QueueError::Closed));
    assert_eq!(h.record_count(), 0);
    assert!(h.services.store.list_unfinished().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_success_checkpoint_is_reported_and_leaves_job_running() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let processor = Services {
        store: Arc::new(SuccessRejectingStore::new(h.store_dir())),
        ..h.services.clone()
    }
    .processor();
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;

    let err = processor.process(id).await.unwrap_err();

    assert_matches!(err, StoreError::Io(_));
    assert!(h.fake.has_database("shop"), "the database work itself completed");
    let stored = h.services.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
}

// ---------------------------------------------------------------------------
// Restart recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_requeues_queued_and_running_jobs() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let queued = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    let interrupted = h
        .submissions
        .submit(request(&h, "inventory", "CREATE TABLE items (id INT);"))
        .await
        .unwrap()
        .job_id();
    let mut running = h.services.store.get(interrupted).await.unwrap().unwrap();
    running.start().unwrap();
    h.services.store.update(&running).await.unwrap();

    let services = h.restarted();
    assert_eq!(services.requeue_unfinished().await.unwrap(), 2);

    let processor = services.processor();
    let mut delivered = Vec::new();
    for _ in 0..2 {
        let id = tokio::time::timeout(Duration::from_millis(200), services.queue.dequeue())
            .await
            .expect("a requeued unit")
            .unwrap()
            .expect("queue open");
        let job = processor.process(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        delivered.push(id);
    }
    delivered.sort();
    let mut expected = vec![queued, interrupted];
    expected.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn restart_skips_finished_jobs() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();
    h.dequeue().await;
    h.processor.process(id).await.unwrap();

    assert_eq!(h.restarted().requeue_unfinished().await.unwrap(), 0);
}

#[tokio::test]
async fn local_connect_recovers_unfinished_jobs() {
    let h = Harness::new(config(), FakeProvisioner::default());
    let id = h.submissions.submit(request(&h, "shop", SCHEMA)).await.unwrap().job_id();

    let store_path = h.store_dir().display().to_string();
    let backend = BackendConfig::from_lookup(|key| match key {
        "SCHEMA_JOB_STORE_PATH" => Some(store_path.clone()),
        _ => None,
    })
    .unwrap();
    assert_eq!(backend.backend, Backend::Local);

    let services = Services::connect(&backend, config()).await.unwrap();
    let delivered = tokio::time::timeout(Duration::from_millis(200), services.queue.dequeue())
        .await
        .expect("a requeued unit")
        .unwrap();
    assert_eq!(delivered, Some(id));
}

#[tokio::test]
async fn postgres_connect_rejects_long_channel_prefix_before_connecting() {
    let backend = BackendConfig::from_lookup(|key| match key {
        "SCHEMA_BACKEND" => Some("postgres".into()),
        "DATABASE_URL" => Some("postgres://127.0.0.1:1/unreachable".into()),
        _ => None,
    })
    .unwrap();
    let pipeline = PipelineConfig {
        channel_prefix: "p".repeat(PG_MAX_CHANNEL_PREFIX_LEN + 1),
        ..config()
    };

    let err = Services::connect(&backend, pipeline).await.err().expect("connect must fail");
    assert_matches!(err, ServicesError::Config(CoreError::Validation(_)));
}
