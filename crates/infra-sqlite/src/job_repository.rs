// SQLite JobRepository Implementation

use crate::error::{decode_error, map_sqlx_error};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tidesync_core::domain::{
    ConnectionSettings, JobStatus, SyncJob, TransferDirection, TransferMode, TransferPolicy,
};
use tidesync_core::error::{AppError, Result};
use tidesync_core::port::JobRepository;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn save(&self, job: &SyncJob) -> Result<()> {
        let connection = serde_json::to_string(job.connection.as_ref())?;
        let policy = serde_json::to_string(&job.policy)?;

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, name, source_path, destination_path, direction, mode,
                recursive, overwrite, enabled, max_retries,
                connection, policy, status, created_at, last_run_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                source_path = excluded.source_path,
                destination_path = excluded.destination_path,
                direction = excluded.direction,
                mode = excluded.mode,
                recursive = excluded.recursive,
                overwrite = excluded.overwrite,
                enabled = excluded.enabled,
                max_retries = excluded.max_retries,
                connection = excluded.connection,
                policy = excluded.policy,
                status = excluded.status,
                last_run_at = excluded.last_run_at,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.source_path)
        .bind(&job.destination_path)
        .bind(job.direction.to_string())
        .bind(job.mode.to_string())
        .bind(job.recursive)
        .bind(job.overwrite)
        .bind(job.enabled)
        .bind(job.max_retries as i64)
        .bind(connection)
        .bind(policy)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.last_run_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<SyncJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM sync_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn get_all(&self) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM sync_jobs ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn update_status(&self, job: &SyncJob) -> Result<()> {
        // Only status columns: keeps WAL writes small on every transition
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, last_run_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.last_run_at)
        .bind(job.finished_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM sync_jobs WHERE status = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    source_path: String,
    destination_path: String,
    direction: String,
    mode: String,
    recursive: bool,
    overwrite: bool,
    enabled: bool,
    max_retries: i64,
    connection: String,
    policy: String,
    status: String,
    created_at: i64,
    last_run_at: Option<i64>,
    finished_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<SyncJob> {
        let direction = match self.direction.as_str() {
            "upload" => TransferDirection::Upload,
            "download" => TransferDirection::Download,
            other => return Err(decode_error("direction", other)),
        };
        let mode = match self.mode.as_str() {
            "copy" => TransferMode::Copy,
            "mirror" => TransferMode::Mirror,
            other => return Err(decode_error("mode", other)),
        };
        let connection: ConnectionSettings = serde_json::from_str(&self.connection)
            .map_err(|e| decode_error("connection", e))?;
        let policy: TransferPolicy =
            serde_json::from_str(&self.policy).map_err(|e| decode_error("policy", e))?;
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e| decode_error("status", e))?;

        Ok(SyncJob {
            id: self.id,
            name: self.name,
            source_path: self.source_path,
            destination_path: self.destination_path,
            direction,
            mode,
            recursive: self.recursive,
            overwrite: self.overwrite,
            enabled: self.enabled,
            max_retries: self.max_retries.clamp(0, u32::MAX as i64) as u32,
            connection: Arc::new(connection),
            policy,
            status,
            created_at: self.created_at,
            last_run_at: self.last_run_at,
            finished_at: self.finished_at,
        })
    }
}
