//! TideSync daemon - composition root
//! Wires SQLite persistence, transfer adapters and the multi-job runner.

mod bootstrap;
mod config;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::DaemonConfig;
use tidesync_core::application::{
    shutdown_channel, JobQueueService, MultiJobRunner, RecoveryService, StatusBoard,
};
use tidesync_core::port::id_provider::UuidProvider;
use tidesync_core::port::{JobRepository, SystemTimeProvider, TimeProvider};
use tidesync_infra_sqlite::{
    create_pool, database_url, run_migrations, SqliteJobRepository, SqliteQueueRepository,
};
use tidesync_infra_transfer::{DefaultTransferClientFactory, FileResumeStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const RUNNER_STOP_TIMEOUT: Duration = Duration::from_secs(45);

/// Install the tracing subscriber; the guard flushes the file writer on drop
fn init_logging() -> Result<Option<WorkerGuard>> {
    let log_format = std::env::var("TIDESYNC_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("tidesync=info"))
        .context("invalid log filter")?;

    let (file_layer, guard) = match std::env::var_os("TIDESYNC_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tidesync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match log_format.as_str() {
        // Production: JSON structured logging
        "json" => registry.with(fmt::layer().json()).init(),
        _ => registry.with(fmt::layer().pretty()).init(),
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging()?;
    info!("TideSync v{} starting...", VERSION);

    // 1. Configuration
    let config_path = config::config_path();
    let mut config = DaemonConfig::load(&config_path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    info!(config = %config_path.display(), queues = config.queues.len(), jobs = config.jobs.len(), "Configuration loaded");

    // 2. Database
    let db_path = config.database_file();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    info!(db_path = %db_path.display(), "Initializing database...");
    let pool = create_pool(&database_url(&db_path))
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Dependency wiring
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone()));
    let queue_repo = Arc::new(SqliteQueueRepository::new(pool.clone()));

    let queue_service = Arc::new(JobQueueService::new(
        Arc::clone(&job_repo),
        queue_repo,
        Arc::new(StatusBoard::new()),
        Arc::clone(&time_provider),
        Arc::new(UuidProvider),
        &config.runner,
    )?);
    let restored = queue_service.load().await?;
    info!(entries = restored, "Queue state restored");

    for queue in &config.queues {
        queue_service
            .ensure_queue(
                &queue.id,
                queue.display_name(),
                queue.max_concurrent_jobs,
                queue.priority,
            )
            .await?;
    }
    bootstrap::register_jobs(
        &job_repo,
        &config.jobs,
        config.runner.default_max_retries,
        &time_provider,
    )
    .await?;

    // 4. Crash recovery
    info!("Running crash recovery...");
    let recovery = RecoveryService::new(
        Arc::clone(&job_repo),
        Arc::clone(&queue_service),
        Arc::clone(&time_provider),
    );
    match recovery.recover_orphaned_jobs().await {
        Ok(count) => info!(recovered_jobs = count, "Crash recovery completed"),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    let queued = bootstrap::queue_startup_jobs(&queue_service, &config.jobs).await;
    if queued > 0 {
        info!(jobs = queued, "Startup jobs queued");
    }

    // 5. Runner
    let mut factory = DefaultTransferClientFactory::new();
    if let Some(dir) = &config.resume_dir {
        factory = factory.with_resume_store(Arc::new(FileResumeStore::new(config::expand_path(dir))));
    }
    if let Some(dir) = &config.snapshot_dir {
        factory = factory.with_snapshot_dir(config::expand_path(dir));
    }

    let runner = Arc::new(MultiJobRunner::new(
        Arc::clone(&queue_service),
        Arc::clone(&job_repo),
        Arc::new(factory),
        Arc::clone(&time_provider),
        config.runner.clone(),
    )?);

    let (shutdown_tx, shutdown_token) = shutdown_channel();
    let runner_handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run(shutdown_token).await })
    };

    info!("System ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    match tokio::time::timeout(RUNNER_STOP_TIMEOUT, runner_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Runner stopped with error"),
        Ok(Err(e)) => error!(error = %e, "Runner task panicked"),
        Err(_) => warn!("Runner did not stop in time"),
    }

    pool.close().await;
    info!("Shutdown complete.");
    Ok(())
}
