//! Test harness wiring the full pipeline over temp directories.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use fileforge::submit::{JobStatusReport, NewJobFile};
use fileforge::{
    ChannelQueue, Database, FsStorageGateway, JobQueue, JobRunner, JobService, ProcessorRegistry,
    StorageGateway, ToolRegistry,
};

/// Isolated environment with every component of the pipeline wired up.
///
/// Jobs are driven synchronously through [`TestHarness::run_all`] instead of
/// through a thread pool, so tests stay deterministic.
pub struct TestHarness {
    pub db: Database,
    pub storage: Arc<FsStorageGateway>,
    pub queue: Arc<ChannelQueue>,
    pub service: JobService,
    pub runner: JobRunner,
    temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_root = temp_dir.path().join("storage");
        let working_root = temp_dir.path().join("work");
        std::fs::create_dir_all(&storage_root).expect("Failed to create storage dir");
        std::fs::create_dir_all(&working_root).expect("Failed to create working dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let storage = Arc::new(FsStorageGateway::new(
            &storage_root,
            chrono::Duration::hours(1),
        ));
        let queue = Arc::new(ChannelQueue::new());

        let service = JobService::new(
            db.clone(),
            storage.clone(),
            Arc::new(ToolRegistry::builtin()),
            queue.clone(),
        );
        let runner = JobRunner::new(
            db.clone(),
            storage.clone(),
            Arc::new(ProcessorRegistry::builtin()),
            working_root,
        );

        Self {
            db,
            storage,
            queue,
            service,
            runner,
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn working_root(&self) -> PathBuf {
        self.temp_dir.path().join("work")
    }

    /// Creates a job, uploads the given files through its grants and
    /// finalizes it. Returns the job id, leaving the job QUEUED.
    pub fn submit(
        &self,
        tool: &str,
        files: &[(&str, Vec<u8>)],
        params: serde_json::Value,
    ) -> String {
        let declared: Vec<NewJobFile> = files
            .iter()
            .map(|(name, bytes)| NewJobFile {
                name: name.to_string(),
                mime_type: None,
                size_bytes: bytes.len() as i64,
            })
            .collect();

        let created = self
            .service
            .create_job(tool, &declared, params, None)
            .expect("create_job failed");

        for (grant, (_, bytes)) in created.upload_grants.iter().zip(files) {
            self.storage
                .upload(&grant.key, bytes, "application/octet-stream")
                .expect("upload failed");
        }

        self.service
            .finalize_job(&created.job_id, &[])
            .expect("finalize_job failed");
        created.job_id
    }

    /// Drains the queue synchronously through the runner.
    pub fn run_all(&self) {
        while let Some(job_id) = self.queue.dequeue().expect("queue closed") {
            self.runner.run(&job_id);
        }
    }

    pub fn status(&self, job_id: &str) -> JobStatusReport {
        self.service.job_status(job_id).expect("job_status failed")
    }

    /// Fetches a stored output object by its grant.
    pub fn download(&self, key: &str) -> Vec<u8> {
        self.storage.download(key).expect("download failed")
    }
}
