//! Queue scheduling against the SQLite store
//!
//! Transfers go through the recording mock client so ordering and
//! concurrency can be observed directly.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{local_job, path_str, write_file, Stack};
use tidesync_core::domain::{JobStatus, MultiJobConfiguration};
use tidesync_core::port::transfer_client::mocks::MockTransferClientFactory;
use tidesync_core::port::{TransferError, TransferErrorKind};

struct Scenario {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    factory: Arc<MockTransferClientFactory>,
    stack: Stack,
}

async fn scenario(config: MultiJobConfiguration, delay: Duration) -> Scenario {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let factory = Arc::new(MockTransferClientFactory::with_delay(delay));
    let stack = Stack::open(&root.join("tidesync.db"), factory.clone(), config).await;
    Scenario {
        _dir: dir,
        root,
        factory,
        stack,
    }
}

impl Scenario {
    /// Register a single-file job; returns its source path
    async fn job(&self, id: &str) -> String {
        let source = write_file(&self.root.join("src").join(id), id.as_bytes());
        let job = local_job(id, &source, Path::new(&format!("/remote/{}", id)));
        self.stack.add(&job).await;
        path_str(&source)
    }

    fn order(&self) -> Vec<String> {
        self.factory
            .transfers()
            .into_iter()
            .map(|(_, destination)| destination.trim_start_matches("/remote/").to_string())
            .collect()
    }
}

fn single_slot() -> MultiJobConfiguration {
    MultiJobConfiguration {
        global_max_concurrent_jobs: 1,
        default_queue_max_concurrent_jobs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_priority_then_fifo_in_single_slot_queue() {
    let s = scenario(single_slot(), Duration::ZERO).await;
    for id in ["low", "high", "mid", "high2"] {
        s.job(id).await;
    }
    let queue = &s.stack.queue_service;
    queue.queue_job("low", None, 1).await.unwrap();
    queue.queue_job("high", None, 10).await.unwrap();
    queue.queue_job("mid", None, 5).await.unwrap();
    queue.queue_job("high2", None, 10).await.unwrap();

    s.stack.idle().await;

    assert_eq!(s.order(), vec!["high", "high2", "mid", "low"]);
}

#[tokio::test]
async fn test_dependency_chain_runs_in_order() {
    let s = scenario(MultiJobConfiguration::default(), Duration::from_millis(20)).await;
    for id in ["extract", "transform", "load"] {
        s.job(id).await;
    }
    let queue = &s.stack.queue_service;
    // queued in reverse so only the edges can produce the order
    queue
        .queue_job_with_dependencies("load", &["transform".to_string()], None, 10)
        .await
        .unwrap();
    queue
        .queue_job_with_dependencies("transform", &["extract".to_string()], None, 5)
        .await
        .unwrap();
    queue.queue_job("extract", None, 0).await.unwrap();

    s.stack.idle().await;

    assert_eq!(s.order(), vec!["extract", "transform", "load"]);
    for id in ["extract", "transform", "load"] {
        assert_eq!(s.stack.runner.get_job_status(id), Some(JobStatus::Completed));
    }
}

#[tokio::test]
async fn test_failed_dependency_keeps_dependents_waiting() {
    let s = scenario(MultiJobConfiguration::default(), Duration::ZERO).await;
    let upstream = s.job("upstream").await;
    s.job("downstream").await;
    s.factory.fail_always(
        &upstream,
        TransferError::new(TransferErrorKind::PermissionDenied, "read-only share"),
    );

    let queue = &s.stack.queue_service;
    queue.queue_job("upstream", None, 0).await.unwrap();
    queue
        .queue_job_with_dependencies("downstream", &["upstream".to_string()], None, 0)
        .await
        .unwrap();

    s.stack.idle().await;

    assert_eq!(s.stack.runner.get_job_status("upstream"), Some(JobStatus::Failed));
    assert_eq!(s.stack.runner.get_job_status("downstream"), Some(JobStatus::Queued));
    assert_eq!(s.factory.attempts(&upstream), 1);
    assert!(s.order().is_empty());
    assert_eq!(
        s.stack.queue_service.dependents_of("upstream").await,
        vec!["downstream".to_string()]
    );
}

#[tokio::test]
async fn test_transient_failures_retry_to_completion() {
    let s = scenario(MultiJobConfiguration::default(), Duration::ZERO).await;
    let source = s.job("flaky").await;
    s.factory.fail_transiently(&source, 2);

    s.stack.runner.start_job("flaky").await.unwrap();
    s.stack.idle().await;

    assert_eq!(s.stack.runner.get_job_status("flaky"), Some(JobStatus::Completed));
    assert_eq!(s.factory.attempts(&source), 3);
    let stats = s.stack.runner.get_statistics("flaky").unwrap();
    assert_eq!(stats.retry_attempts, 2);
    let stored = s.stack.job_repo.get_by_id("flaky").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_global_cap_bounds_all_queues() {
    let config = MultiJobConfiguration {
        global_max_concurrent_jobs: 2,
        ..Default::default()
    };
    let s = scenario(config, Duration::from_millis(50)).await;
    let queue = &s.stack.queue_service;
    queue.ensure_queue("photos", "Photos", 3, 0).await.unwrap();
    queue.ensure_queue("docs", "Docs", 3, 0).await.unwrap();
    for i in 0..4 {
        let photo = format!("photo-{}", i);
        let doc = format!("doc-{}", i);
        s.job(&photo).await;
        s.job(&doc).await;
        queue.queue_job(&photo, Some("photos"), 0).await.unwrap();
        queue.queue_job(&doc, Some("docs"), 0).await.unwrap();
    }

    s.stack.idle().await;

    assert_eq!(s.factory.transfers().len(), 8);
    assert!(s.factory.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_queue_cap_bounds_its_own_jobs() {
    let s = scenario(MultiJobConfiguration::default(), Duration::from_millis(30)).await;
    let queue = &s.stack.queue_service;
    queue.ensure_queue("serial", "Serial", 1, 0).await.unwrap();
    for i in 0..3 {
        let id = format!("serial-{}", i);
        s.job(&id).await;
        queue.queue_job(&id, Some("serial"), 0).await.unwrap();
    }

    s.stack.idle().await;

    assert_eq!(s.factory.transfers().len(), 3);
    assert_eq!(s.factory.max_in_flight(), 1);
}

#[tokio::test]
async fn test_duplicate_and_cyclic_entries_are_rejected() {
    let s = scenario(MultiJobConfiguration::default(), Duration::ZERO).await;
    for id in ["a", "b", "c"] {
        s.job(id).await;
    }
    let queue = &s.stack.queue_service;
    queue.ensure_queue("other", "Other", 1, 0).await.unwrap();

    queue.queue_job("a", None, 0).await.unwrap();
    assert!(queue.queue_job("a", Some("other"), 0).await.is_err());

    queue
        .queue_job_with_dependencies("b", &["c".to_string()], None, 0)
        .await
        .unwrap();
    assert!(queue
        .queue_job_with_dependencies("c", &["b".to_string()], None, 0)
        .await
        .is_err());
    assert!(queue.queue_of("c").await.is_none());
    assert_eq!(queue.pending_job_ids().await.len(), 2);
}

#[tokio::test]
async fn test_stop_queued_job_never_transfers() {
    let s = scenario(single_slot(), Duration::from_millis(20)).await;
    s.job("first").await;
    s.job("second").await;
    let queue = &s.stack.queue_service;
    queue.queue_job("first", None, 0).await.unwrap();
    queue.queue_job("second", None, 0).await.unwrap();

    assert!(s.stack.runner.stop_job("second").await.unwrap());
    s.stack.idle().await;

    assert_eq!(s.order(), vec!["first"]);
    assert_eq!(s.stack.runner.get_job_status("second"), Some(JobStatus::Cancelled));
}
