//! Restart behaviour: queue state, dependencies and interrupted jobs
//! survive closing and reopening the SQLite store.

mod common;

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use common::{local_factory, local_job, payload, write_file, Stack};
use tidesync_core::application::shutdown_channel;
use tidesync_core::domain::{JobStatus, MultiJobConfiguration};

async fn open(root: &std::path::Path) -> Stack {
    Stack::open(
        &root.join("tidesync.db"),
        local_factory(root),
        MultiJobConfiguration::default(),
    )
    .await
}

#[tokio::test]
async fn test_queue_and_dependencies_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let first = write_file(&root.join("src/first.txt"), b"first");
    let second = write_file(&root.join("src/second.txt"), b"second");

    let before = open(root).await;
    before
        .add(&local_job("first", &first, &root.join("dst/first.txt")))
        .await;
    before
        .add(&local_job("second", &second, &root.join("dst/second.txt")))
        .await;
    let queue = &before.queue_service;
    queue.ensure_queue("nightly", "Nightly", 1, 7).await.unwrap();
    queue
        .queue_job_with_dependencies("second", &["first".to_string()], Some("nightly"), 9)
        .await
        .unwrap();
    queue.queue_job("first", Some("nightly"), 1).await.unwrap();
    before.close().await;

    let after = open(root).await;
    let queue = &after.queue_service;
    let pending = queue.pending_job_ids().await;
    let expected: HashSet<String> = ["first", "second"].iter().map(|s| s.to_string()).collect();
    assert_eq!(pending, expected);
    assert_eq!(queue.queue_of("second").await.as_deref(), Some("nightly"));
    assert_eq!(queue.dependents_of("first").await, vec!["second".to_string()]);
    assert_eq!(queue.get_queue("nightly").await.unwrap().priority, 7);
    assert_eq!(after.recover().await, 0);

    after.idle().await;

    assert_eq!(fs::read(root.join("dst/first.txt")).unwrap(), b"first");
    assert_eq!(fs::read(root.join("dst/second.txt")).unwrap(), b"second");
    let first = after.job_repo.get_by_id("first").await.unwrap().unwrap();
    let second = after.job_repo.get_by_id("second").await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    // the higher-priority dependent still waited for its dependency
    assert!(second.last_run_at.unwrap() >= first.finished_at.unwrap());
    after.close().await;
}

#[tokio::test]
async fn test_orphaned_jobs_are_requeued_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let crashed_src = write_file(&root.join("src/crashed.txt"), b"crashed");
    let lost_src = write_file(&root.join("src/lost.txt"), b"lost");
    let done_src = write_file(&root.join("src/done.txt"), b"done");

    let before = open(root).await;
    let mut crashed = local_job("crashed", &crashed_src, &root.join("dst/crashed.txt"));
    crashed.status = JobStatus::Running;
    crashed.last_run_at = Some(5_000);
    // queued in the repository but missing from every queue
    let mut lost = local_job("lost", &lost_src, &root.join("dst/lost.txt"));
    lost.status = JobStatus::Queued;
    let mut done = local_job("done", &done_src, &root.join("dst/done.txt"));
    done.status = JobStatus::Completed;
    for job in [&crashed, &lost, &done] {
        before.add(job).await;
    }
    before.close().await;

    let after = open(root).await;
    assert_eq!(after.recover().await, 2);
    assert_eq!(after.runner.get_job_status("crashed"), Some(JobStatus::Queued));
    assert_eq!(after.runner.get_job_status("done"), Some(JobStatus::Completed));

    after.idle().await;

    assert_eq!(after.runner.get_job_status("crashed"), Some(JobStatus::Completed));
    assert_eq!(after.runner.get_job_status("lost"), Some(JobStatus::Completed));
    assert_eq!(fs::read(root.join("dst/crashed.txt")).unwrap(), b"crashed");
    assert!(!root.join("dst/done.txt").exists());
    after.close().await;
}

/// Start a throttled resumable copy, shut the runner down mid-file, then
/// reopen the store and let recovery finish it
async fn interrupt_and_resume(overwrite: bool) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let contents = payload(2 * 1024 * 1024);
    let src = write_file(&root.join("src/archive.tar"), &contents);
    let dst = root.join("dst/archive.tar");

    let before = open(root).await;
    let mut job = local_job("archive", &src, &dst);
    job.overwrite = overwrite;
    job.policy.enable_resume = true;
    job.policy.bandwidth_limit_bytes_per_sec = 1024 * 1024;
    before.add(&job).await;
    before.runner.start_job("archive").await.unwrap();

    let (shutdown_tx, token) = shutdown_channel();
    let stop = async {
        for _ in 0..100 {
            if before.runner.get_job_status("archive") == Some(JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.shutdown();
    };
    let (result, _) = tokio::join!(before.runner.run(token), stop);
    result.unwrap();

    let stored = before.job_repo.get_by_id("archive").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    // only the in-flight copy exists so far
    assert!(!dst.exists());
    before.close().await;

    let after = open(root).await;
    assert_eq!(after.recover().await, 1);
    after.idle().await;

    assert_eq!(after.runner.get_job_status("archive"), Some(JobStatus::Completed));
    assert_eq!(fs::read(&dst).unwrap(), contents);
    assert!(!root.join("dst/archive.tar.part").exists());
    let stats = after.runner.get_statistics("archive").unwrap();
    assert_eq!(stats.files_succeeded, 1);
    assert_eq!(stats.files_skipped, 0);
    after.close().await;
}

#[tokio::test]
async fn test_interrupted_transfer_resumes_after_restart() {
    interrupt_and_resume(true).await;
}

#[tokio::test]
async fn test_interrupted_transfer_resumes_without_overwrite() {
    interrupt_and_resume(false).await;
}
