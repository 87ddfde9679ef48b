//! Polling worker pool.
//!
//! N OS threads compete on the same queue. An empty poll sleeps for the
//! configured interval; a queue error backs off longer instead of spinning.
//! Shutdown is cooperative through a shared flag, so a worker finishes the
//! job it holds before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::WorkerError;
use crate::queue::JobQueue;

use super::JobRunner;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(
        worker_count: usize,
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
        poll_interval: Duration,
        error_backoff: Duration,
    ) -> Result<Self, WorkerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(worker_count);

        for i in 0..worker_count {
            let queue = queue.clone();
            let runner = runner.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || worker_loop(queue, runner, shutdown, poll_interval, error_backoff))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            handles.push(handle);
        }

        log::info!("Started {} worker thread(s)", worker_count);
        Ok(Self { handles, shutdown })
    }

    /// Shared flag for external shutdown triggers (signal handlers).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Blocks until every worker thread has exited.
    pub fn join(mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
        log::info!("All workers stopped");
    }
}

fn worker_loop(
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    error_backoff: Duration,
) {
    log::debug!("Worker started");
    while !shutdown.load(Ordering::SeqCst) {
        match queue.dequeue() {
            Ok(Some(job_id)) => {
                runner.run(&job_id);
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(e) => {
                log::error!("Queue error, backing off: {}", e);
                thread::sleep(error_backoff);
            }
        }
    }
    log::debug!("Worker stopped");
}
