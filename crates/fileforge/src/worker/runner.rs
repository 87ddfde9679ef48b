//! Per-job execution procedure.
//!
//! A runner takes a dequeued job id through the full lifecycle: claim it with
//! a conditional QUEUED -> PROCESSING write, materialize inputs into a scratch
//! directory, run the processor, upload and record outputs, and finish with
//! PROCESSING -> COMPLETED. Any error on the way marks the job FAILED with a
//! stable error code; the worker loop itself never dies on a bad job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::db::job_repo::{self, TransitionError};
use crate::db::{input_repo, output_repo, Database, DatabaseError};
use crate::error::{JobErrorCode, ProcessError, StorageError, WorkerError};
use crate::processor::{ProcessContext, ProcessorRegistry};
use crate::sanitize;
use crate::state::{
    JobStatus, PROGRESS_DONE, PROGRESS_DOWNLOADED, PROGRESS_PROCESSING, PROGRESS_UPLOADED,
};
use crate::storage::StorageGateway;

pub struct JobRunner {
    db: Database,
    storage: Arc<dyn StorageGateway>,
    processors: Arc<ProcessorRegistry>,
    working_root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Stored job parameters are not valid JSON: {0}")]
    BadParams(serde_json::Error),
}

impl RunError {
    fn code(&self) -> JobErrorCode {
        match self {
            RunError::Worker(WorkerError::MissingProcessor(_)) => JobErrorCode::MissingProcessor,
            RunError::Worker(WorkerError::OutputMissing { .. }) => JobErrorCode::OutputMissing,
            RunError::Worker(_) => JobErrorCode::Processing,
            RunError::Process(ProcessError::NoValidInput) => JobErrorCode::NoValidInput,
            RunError::Process(_) => JobErrorCode::Processing,
            RunError::Storage(_) => JobErrorCode::Storage,
            RunError::Database(_) => JobErrorCode::Database,
            RunError::Transition(e) => e.code(),
            RunError::BadParams(_) => JobErrorCode::Validation,
        }
    }
}

/// Scratch directory for one job attempt. Removed on drop, so cleanup holds
/// on every exit path, including processor panics unwinding through us.
struct WorkDirGuard {
    path: PathBuf,
}

impl WorkDirGuard {
    fn create(root: &Path, job_id: &str) -> Result<Self, StorageError> {
        let path = root.join(format!("job-{}", job_id));
        std::fs::create_dir_all(&path).map_err(|e| StorageError::CreateDirectory {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to clean up working directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

impl JobRunner {
    pub fn new(
        db: Database,
        storage: Arc<dyn StorageGateway>,
        processors: Arc<ProcessorRegistry>,
        working_root: PathBuf,
    ) -> Self {
        Self {
            db,
            storage,
            processors,
            working_root,
        }
    }

    /// Claims and runs one dequeued job end to end.
    ///
    /// Returns `false` when the claim was lost (another consumer already moved
    /// the job, or it no longer exists in QUEUED); that is a quiet skip, not
    /// an error. Returns `true` when this runner owned the attempt, whether it
    /// completed or failed the job.
    pub fn run(&self, job_id: &str) -> bool {
        let _span = tracing::info_span!("job", id = %job_id).entered();

        match job_repo::transition(
            &self.db,
            job_id,
            JobStatus::Queued,
            JobStatus::Processing,
            Some(PROGRESS_PROCESSING),
        ) {
            Ok(()) => {}
            Err(TransitionError::StateMismatch { .. }) => {
                tracing::debug!("claim lost, skipping");
                return false;
            }
            Err(e) => {
                tracing::error!("failed to claim job: {}", e);
                return false;
            }
        }

        let started = Instant::now();
        match self.execute(job_id) {
            Ok(output_count) => {
                tracing::info!(
                    outputs = output_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job completed"
                );
            }
            Err(e) => {
                let code = e.code();
                tracing::warn!(code = %code, "job failed: {}", e);
                if let Err(db_err) = job_repo::fail(&self.db, job_id, code, &e.to_string()) {
                    tracing::error!("failed to record job failure: {}", db_err);
                }
            }
        }
        true
    }

    fn execute(&self, job_id: &str) -> Result<usize, RunError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;

        let processor = self
            .processors
            .resolve(&job.tool_slug)
            .ok_or_else(|| WorkerError::MissingProcessor(job.tool_slug.clone()))?;

        let params: serde_json::Value = match &job.params {
            Some(text) => serde_json::from_str(text).map_err(RunError::BadParams)?,
            None => serde_json::Value::Object(Default::default()),
        };

        let workdir = WorkDirGuard::create(&self.working_root, job_id)?;

        let inputs = input_repo::list_for_job(&self.db, job_id)?;
        let mut input_files = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let bytes = self.storage.download(&input.storage_key)?;
            let mut local = workdir.path().join(sanitize::safe_filename(&input.filename));
            if local.exists() {
                // Duplicate declared filenames within one job.
                local = workdir.path().join(format!(
                    "{}-{}",
                    input.ordinal,
                    sanitize::safe_filename(&input.filename)
                ));
            }
            std::fs::write(&local, &bytes).map_err(|e| StorageError::WriteFile {
                path: local.clone(),
                source: e,
            })?;
            input_files.push(local);
        }
        job_repo::set_progress(&self.db, job_id, PROGRESS_DOWNLOADED)?;

        let ctx = ProcessContext {
            job_id: job_id.to_string(),
            params,
            input_files,
            working_dir: workdir.path().to_path_buf(),
        };
        let result = processor.process(&ctx)?;
        for warning in &result.warnings {
            tracing::warn!("{}", warning);
        }

        let mut rows = Vec::with_capacity(result.outputs.len());
        for output in &result.outputs {
            let local = workdir.path().join(&output.filename);
            if !local.is_file() {
                return Err(WorkerError::OutputMissing {
                    filename: output.filename.clone(),
                }
                .into());
            }
            let bytes = std::fs::read(&local).map_err(|e| StorageError::ReadFile {
                path: local.clone(),
                source: e,
            })?;
            self.storage
                .upload(&output.storage_key, &bytes, &output.mime_type)?;
            rows.push(output_repo::OutputRow {
                job_id: job_id.to_string(),
                filename: output.filename.clone(),
                mime_type: output.mime_type.clone(),
                size_bytes: bytes.len() as i64,
                storage_key: output.storage_key.clone(),
            });
        }
        job_repo::set_progress(&self.db, job_id, PROGRESS_UPLOADED)?;

        // Rows are persisted only after every upload has succeeded, so a
        // recorded output always points at an existing object.
        for row in &rows {
            output_repo::insert(&self.db, row)?;
        }

        job_repo::transition(
            &self.db,
            job_id,
            JobStatus::Processing,
            JobStatus::Completed,
            Some(PROGRESS_DONE),
        )?;

        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::JobRow;
    use crate::processor::{OutputFile, ProcessResult, Processor, ProcessorRegistry};
    use crate::storage::FsStorageGateway;

    struct Harness {
        db: Database,
        storage: Arc<FsStorageGateway>,
        runner: JobRunner,
        _storage_dir: tempfile::TempDir,
        working_root: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let storage_dir = tempfile::tempdir().unwrap();
        let working_root = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsStorageGateway::new(
            storage_dir.path(),
            chrono::Duration::hours(1),
        ));
        let runner = JobRunner::new(
            db.clone(),
            storage.clone(),
            Arc::new(ProcessorRegistry::builtin()),
            working_root.path().to_path_buf(),
        );
        Harness {
            db,
            storage,
            runner,
            _storage_dir: storage_dir,
            working_root,
        }
    }

    /// Inserts a QUEUED job with uploaded inputs, bypassing the submission
    /// service.
    fn seed_queued_job(
        h: &Harness,
        id: &str,
        tool: &str,
        params: Option<&str>,
        files: &[(&str, &[u8])],
    ) {
        job_repo::insert(
            &h.db,
            &JobRow::new(
                id.to_string(),
                tool.to_string(),
                None,
                params.map(str::to_string),
            ),
        )
        .unwrap();

        for (ordinal, (name, bytes)) in files.iter().enumerate() {
            let key = format!("jobs/{}/inputs/{}-{}", id, ordinal, name);
            h.storage.upload(&key, bytes, "application/octet-stream").unwrap();
            input_repo::insert(
                &h.db,
                &input_repo::InputRow {
                    job_id: id.to_string(),
                    ordinal: ordinal as i64,
                    filename: name.to_string(),
                    mime_type: "application/octet-stream".to_string(),
                    size_bytes: bytes.len() as i64,
                    storage_key: key,
                    etag: None,
                },
            )
            .unwrap();
        }

        job_repo::transition(&h.db, id, JobStatus::Pending, JobStatus::Queued, None).unwrap();
    }

    #[test]
    fn test_run_completes_markdown_job() {
        let h = harness();
        seed_queued_job(
            &h,
            "j1",
            "markdown-converter",
            Some(r#"{"frontMatter":false}"#),
            &[("a.md", b"Hello"), ("b.md", b"World")],
        );

        assert!(h.runner.run("j1"));

        let row = job_repo::find_by_id(&h.db, "j1").unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.progress, 100);

        let outputs = output_repo::list_for_job(&h.db, "j1").unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].filename, "output.md");

        let content = h.storage.download("jobs/j1/outputs/output.md").unwrap();
        assert_eq!(content, b"Hello\n\n---\n\nWorld");

        // Scratch directory is gone.
        assert!(!h.working_root.path().join("job-j1").exists());
    }

    #[test]
    fn test_run_skips_lost_claim() {
        let h = harness();
        job_repo::insert(
            &h.db,
            &JobRow::new("j1".to_string(), "pdf-merge".to_string(), None, None),
        )
        .unwrap();

        // Still PENDING: the claim CAS must miss and leave the row untouched.
        assert!(!h.runner.run("j1"));
        let row = job_repo::find_by_id(&h.db, "j1").unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
    }

    #[test]
    fn test_unknown_tool_fails_job_with_code() {
        let h = harness();
        seed_queued_job(&h, "j1", "ocr-magic", None, &[("a.md", b"x")]);

        assert!(h.runner.run("j1"));

        let row = job_repo::find_by_id(&h.db, "j1").unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("MISSING_PROCESSOR"));
        assert!(row.error_message.unwrap().contains("ocr-magic"));
    }

    #[test]
    fn test_no_valid_input_fails_with_zero_outputs() {
        let h = harness();
        seed_queued_job(
            &h,
            "j1",
            "markdown-converter",
            None,
            &[("data.bin", b"\x00\x01")],
        );

        assert!(h.runner.run("j1"));

        let row = job_repo::find_by_id(&h.db, "j1").unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("NO_VALID_INPUT"));
        assert_eq!(output_repo::count_for_job(&h.db, "j1").unwrap(), 0);
        assert!(!h.working_root.path().join("job-j1").exists());
    }

    #[test]
    fn test_missing_input_object_fails_with_storage_code() {
        let h = harness();
        // Input row points at a key that was never uploaded.
        job_repo::insert(
            &h.db,
            &JobRow::new("j1".to_string(), "markdown-converter".to_string(), None, None),
        )
        .unwrap();
        input_repo::insert(
            &h.db,
            &input_repo::InputRow {
                job_id: "j1".to_string(),
                ordinal: 0,
                filename: "a.md".to_string(),
                mime_type: "text/markdown".to_string(),
                size_bytes: 5,
                storage_key: "jobs/j1/inputs/0-a.md".to_string(),
                etag: None,
            },
        )
        .unwrap();
        job_repo::transition(&h.db, "j1", JobStatus::Pending, JobStatus::Queued, None).unwrap();

        assert!(h.runner.run("j1"));
        let row = job_repo::find_by_id(&h.db, "j1").unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("STORAGE"));
    }

    /// Declares an output file it never writes, violating the processor
    /// contract.
    struct GhostOutputProcessor;

    impl Processor for GhostOutputProcessor {
        fn slug(&self) -> &'static str {
            "ghost-output"
        }

        fn process(&self, ctx: &ProcessContext) -> Result<ProcessResult, ProcessError> {
            Ok(ProcessResult {
                outputs: vec![OutputFile {
                    storage_key: format!("jobs/{}/outputs/ghost.txt", ctx.job_id),
                    filename: "ghost.txt".to_string(),
                    mime_type: "text/plain".to_string(),
                }],
                warnings: vec![],
            })
        }
    }

    #[test]
    fn test_undeclared_output_file_fails_with_code() {
        let h = harness();
        let runner = JobRunner::new(
            h.db.clone(),
            h.storage.clone(),
            Arc::new(ProcessorRegistry::new(vec![Box::new(GhostOutputProcessor)])),
            h.working_root.path().to_path_buf(),
        );
        seed_queued_job(&h, "j1", "ghost-output", None, &[("a.md", b"x")]);

        assert!(runner.run("j1"));

        let row = job_repo::find_by_id(&h.db, "j1").unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("OUTPUT_MISSING"));
        assert!(row.error_message.unwrap().contains("ghost.txt"));
        assert_eq!(output_repo::count_for_job(&h.db, "j1").unwrap(), 0);
        assert!(!h.working_root.path().join("job-j1").exists());
    }

    #[test]
    fn test_resize_persists_one_output_per_input() {
        let h = harness();

        let img = image::RgbImage::from_pixel(64, 64, image::Rgb([1, 2, 3]));
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        let bytes = png.into_inner();

        seed_queued_job(
            &h,
            "j1",
            "image-resize",
            Some(r#"{"width":32}"#),
            &[("a.png", &bytes), ("b.png", &bytes)],
        );

        assert!(h.runner.run("j1"));

        let outputs = output_repo::list_for_job(&h.db, "j1").unwrap();
        assert_eq!(outputs.len(), 2);
        for output in &outputs {
            assert!(h.storage.download(&output.storage_key).is_ok());
            assert!(output.size_bytes > 0);
        }
    }
}
