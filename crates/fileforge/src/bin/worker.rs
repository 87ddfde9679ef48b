//! Worker process: consumes the job queue until told to stop.
//!
//! Usage: `worker [config.json]`. Without an argument every setting falls
//! back to its default.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fileforge::db::job_repo;
use fileforge::error::{JobErrorCode, WorkerError};
use fileforge::{
    ChannelQueue, Config, Database, FsStorageGateway, JobQueue, JobRunner, JobStatus,
    ProcessorRegistry, StorageGateway, WorkerPool,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}

fn run() -> fileforge::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };
    log::info!(
        "Starting worker: {} thread(s), storage at {}",
        config.worker_count,
        config.storage_root.display()
    );

    let db = Database::open(&config.database_path)?;
    let storage: Arc<dyn StorageGateway> = Arc::new(FsStorageGateway::new(
        &config.storage_root,
        config.grant_ttl(),
    ));
    let queue = Arc::new(ChannelQueue::new());

    recover(&db, queue.as_ref())?;

    let runner = Arc::new(JobRunner::new(
        db,
        storage,
        Arc::new(ProcessorRegistry::builtin()),
        config.working_root.clone(),
    ));
    let pool = WorkerPool::start(
        config.worker_count,
        queue,
        runner,
        config.poll_interval(),
        config.error_backoff(),
    )?;

    let shutdown = pool.shutdown_handle();
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received, finishing in-flight jobs");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| WorkerError::SpawnFailed(format!("failed to install signal handler: {}", e)))?;

    pool.join();
    Ok(())
}

/// Reconciles the database with the empty in-process queue after a restart.
///
/// QUEUED jobs are re-enqueued; jobs stuck in PROCESSING belonged to a worker
/// that died mid-run and are failed so a caller can retry them.
fn recover(db: &Database, queue: &dyn JobQueue) -> fileforge::Result<()> {
    let queued = job_repo::list_ids_by_status(db, JobStatus::Queued)?;
    if !queued.is_empty() {
        log::info!("Re-enqueueing {} queued job(s) from a previous run", queued.len());
    }
    for id in &queued {
        queue.enqueue(id)?;
    }

    for id in job_repo::list_ids_by_status(db, JobStatus::Processing)? {
        log::warn!("Job {} was in flight during the last shutdown, marking failed", id);
        job_repo::fail(
            db,
            &id,
            JobErrorCode::Processing,
            "Worker process exited while the job was running",
        )?;
    }

    Ok(())
}
