// SQLite QueueRepository Implementation

use crate::error::{decode_error, map_sqlx_error};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use tidesync_core::domain::{JobQueue, QueueEntry};
use tidesync_core::error::Result;
use tidesync_core::port::QueueRepository;
use tracing::debug;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn save_queue(&self, queue: &JobQueue) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO job_queues (
                id, name, max_concurrent_jobs, priority, active,
                created_at, completed_count, failed_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                max_concurrent_jobs = excluded.max_concurrent_jobs,
                priority = excluded.priority,
                active = excluded.active,
                completed_count = excluded.completed_count,
                failed_count = excluded.failed_count
            "#,
        )
        .bind(&queue.id)
        .bind(&queue.name)
        .bind(queue.max_concurrent_jobs as i64)
        .bind(queue.priority)
        .bind(queue.active)
        .bind(queue.created_at)
        .bind(queue.completed_count as i64)
        .bind(queue.failed_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        // Entries are rewritten as a whole: the queue is the unit of persistence
        sqlx::query("DELETE FROM queue_entries WHERE queue_id = ?")
            .bind(&queue.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for entry in queue.entries() {
            let dependencies = serde_json::to_string(&entry.dependencies)?;
            sqlx::query(
                r#"
                INSERT INTO queue_entries (queue_id, job_id, priority, dependencies, seq, queued_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&queue.id)
            .bind(&entry.job_id)
            .bind(entry.priority)
            .bind(dependencies)
            .bind(entry.seq as i64)
            .bind(entry.queued_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(queue_id = %queue.id, entries = queue.entries().len(), "Queue persisted");
        Ok(())
    }

    async fn get_all_queues(&self) -> Result<Vec<JobQueue>> {
        let queue_rows = sqlx::query_as::<_, QueueRow>(
            "SELECT * FROM job_queues ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let entry_rows =
            sqlx::query_as::<_, EntryRow>("SELECT * FROM queue_entries ORDER BY queue_id, seq")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut entries_by_queue: HashMap<String, Vec<QueueEntry>> = HashMap::new();
        for row in entry_rows {
            let queue_id = row.queue_id.clone();
            entries_by_queue
                .entry(queue_id)
                .or_default()
                .push(row.into_entry()?);
        }

        Ok(queue_rows
            .into_iter()
            .map(|row| {
                let entries = entries_by_queue.remove(&row.id).unwrap_or_default();
                row.into_queue(entries)
            })
            .collect())
    }

    async fn delete_queue(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM queue_entries WHERE queue_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let result = sqlx::query("DELETE FROM job_queues WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    name: String,
    max_concurrent_jobs: i64,
    priority: i32,
    active: bool,
    created_at: i64,
    completed_count: i64,
    failed_count: i64,
}

impl QueueRow {
    fn into_queue(self, entries: Vec<QueueEntry>) -> JobQueue {
        JobQueue::restore(
            self.id,
            self.name,
            self.max_concurrent_jobs.max(1) as usize,
            self.priority,
            self.active,
            self.created_at,
            self.completed_count.max(0) as u64,
            self.failed_count.max(0) as u64,
            entries,
        )
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    queue_id: String,
    job_id: String,
    priority: i32,
    dependencies: String,
    seq: i64,
    queued_at: i64,
}

impl EntryRow {
    fn into_entry(self) -> Result<QueueEntry> {
        let dependencies: BTreeSet<String> = serde_json::from_str(&self.dependencies)
            .map_err(|e| decode_error("dependencies", e))?;
        Ok(QueueEntry {
            job_id: self.job_id,
            priority: self.priority,
            dependencies,
            seq: self.seq.max(0) as u64,
            queued_at: self.queued_at,
        })
    }
}
