//! Job submission service.
//!
//! Library-level front door for clients: declare a job and its input files,
//! upload through the returned grants, finalize to hand the job to the
//! workers, then poll status. Bytes never pass through this service; they
//! move through storage grants.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::db::job_repo::{self, JobRow};
use crate::db::{input_repo, output_repo, Database};
use crate::error::{JobErrorCode, SubmitError};
use crate::queue::JobQueue;
use crate::state::JobStatus;
use crate::storage::{FileMeta, OutputRef, StorageGateway, TransferGrant};
use crate::tools::ToolRegistry;

/// A file the client intends to upload for a job.
#[derive(Debug, Clone)]
pub struct NewJobFile {
    pub name: String,
    /// Declared MIME type; guessed from the filename when absent.
    pub mime_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub job_id: String,
    /// One grant per declared file, in declaration order.
    pub upload_grants: Vec<TransferGrant>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: String,
    pub tool_slug: String,
    pub status: JobStatus,
    pub progress: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Download grants for the results; present only once COMPLETED.
    pub outputs: Vec<TransferGrant>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct JobService {
    db: Database,
    storage: Arc<dyn StorageGateway>,
    tools: Arc<ToolRegistry>,
    queue: Arc<dyn JobQueue>,
}

impl JobService {
    pub fn new(
        db: Database,
        storage: Arc<dyn StorageGateway>,
        tools: Arc<ToolRegistry>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            db,
            storage,
            tools,
            queue,
        }
    }

    /// Validates and records a new job in PENDING, returning upload grants
    /// for its declared input files. Nothing is queued yet; the job only
    /// becomes visible to workers at `finalize_job`.
    pub fn create_job(
        &self,
        tool_slug: &str,
        files: &[NewJobFile],
        params: Value,
        user_id: Option<&str>,
    ) -> Result<CreatedJob, SubmitError> {
        let tool = self
            .tools
            .get(tool_slug)
            .ok_or_else(|| SubmitError::UnknownTool(tool_slug.to_string()))?;

        if files.is_empty() {
            return Err(SubmitError::NoInputFiles);
        }
        if files.len() > tool.max_input_files {
            return Err(SubmitError::TooManyFiles {
                max: tool.max_input_files,
                got: files.len(),
            });
        }
        self.tools.validate_params(tool_slug, &params)?;

        let job_id = uuid::Uuid::new_v4().to_string();

        let metas: Vec<FileMeta> = files
            .iter()
            .map(|file| FileMeta {
                name: file.name.clone(),
                mime_type: file.mime_type.clone().unwrap_or_else(|| {
                    mime_guess::from_path(&file.name)
                        .first_or_octet_stream()
                        .essence_str()
                        .to_string()
                }),
                size_bytes: file.size_bytes,
            })
            .collect();
        let upload_grants = self.storage.create_upload_grants(&job_id, &metas)?;

        job_repo::insert(
            &self.db,
            &JobRow::new(
                job_id.clone(),
                tool_slug.to_string(),
                user_id.map(str::to_string),
                Some(params.to_string()),
            ),
        )?;
        for (ordinal, (meta, grant)) in metas.iter().zip(&upload_grants).enumerate() {
            input_repo::insert(
                &self.db,
                &input_repo::InputRow {
                    job_id: job_id.clone(),
                    ordinal: ordinal as i64,
                    filename: meta.name.clone(),
                    mime_type: meta.mime_type.clone(),
                    size_bytes: meta.size_bytes,
                    storage_key: grant.key.clone(),
                    etag: None,
                },
            )?;
        }

        log::info!(
            "Created job {} ({}) with {} input file(s)",
            job_id,
            tool_slug,
            files.len()
        );
        Ok(CreatedJob {
            job_id,
            upload_grants,
        })
    }

    /// Confirms the uploads and hands the job to the workers.
    ///
    /// `etags` pairs with the job's inputs by ordinal; `None` entries are
    /// skipped. The PENDING -> QUEUED move is conditional, so a double
    /// finalize gets a transition error instead of enqueueing twice.
    pub fn finalize_job(&self, job_id: &str, etags: &[Option<String>]) -> Result<(), SubmitError> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| SubmitError::JobNotFound(job_id.to_string()))?;

        for (ordinal, etag) in etags.iter().enumerate() {
            if let Some(etag) = etag {
                input_repo::set_etag(&self.db, job_id, ordinal as i64, etag)?;
            }
        }

        job_repo::transition(&self.db, job_id, JobStatus::Pending, JobStatus::Queued, None)?;

        if let Err(e) = self.queue.enqueue(job_id) {
            let message = format!("Failed to enqueue job: {}", e);
            log::error!("{} ({})", message, job_id);
            job_repo::fail(&self.db, job_id, JobErrorCode::Processing, &message)?;
            return Err(e.into());
        }

        log::info!("Job {} queued", job_id);
        Ok(())
    }

    /// Current status, progress and error fields, plus download grants for
    /// the outputs once the job is COMPLETED.
    pub fn job_status(&self, job_id: &str) -> Result<JobStatusReport, SubmitError> {
        let row = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| SubmitError::JobNotFound(job_id.to_string()))?;

        let outputs = if row.status == JobStatus::Completed {
            let refs: Vec<OutputRef> = output_repo::list_for_job(&self.db, job_id)?
                .into_iter()
                .map(|o| OutputRef {
                    key: o.storage_key,
                    name: o.filename,
                })
                .collect();
            self.storage.create_download_grants(job_id, &refs)?
        } else {
            Vec::new()
        };

        Ok(JobStatusReport {
            job_id: row.id,
            tool_slug: row.tool_slug,
            status: row.status,
            progress: row.progress,
            error_code: row.error_code,
            error_message: row.error_message,
            outputs,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Re-queues a FAILED job. Only an explicit caller decision ever retries
    /// a job; the worker itself never re-runs failures.
    pub fn retry_job(&self, job_id: &str) -> Result<(), SubmitError> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| SubmitError::JobNotFound(job_id.to_string()))?;

        job_repo::transition(&self.db, job_id, JobStatus::Failed, JobStatus::Queued, None)?;
        job_repo::clear_error(&self.db, job_id)?;
        self.queue.enqueue(job_id)?;

        log::info!("Job {} re-queued for retry", job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::TransitionError;
    use crate::queue::ChannelQueue;
    use crate::storage::FsStorageGateway;

    struct Harness {
        service: JobService,
        db: Database,
        storage: Arc<FsStorageGateway>,
        queue: Arc<ChannelQueue>,
        _storage_dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let storage_dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsStorageGateway::new(
            storage_dir.path(),
            chrono::Duration::hours(1),
        ));
        let queue = Arc::new(ChannelQueue::new());
        let service = JobService::new(
            db.clone(),
            storage.clone(),
            Arc::new(ToolRegistry::builtin()),
            queue.clone(),
        );
        Harness {
            service,
            db,
            storage,
            queue,
            _storage_dir: storage_dir,
        }
    }

    fn md_file(name: &str) -> NewJobFile {
        NewJobFile {
            name: name.to_string(),
            mime_type: None,
            size_bytes: 5,
        }
    }

    #[test]
    fn test_create_finalize_flow() {
        let h = harness();

        let created = h
            .service
            .create_job(
                "markdown-converter",
                &[md_file("a.md"), md_file("b.md")],
                serde_json::json!({}),
                Some("user-1"),
            )
            .unwrap();
        assert_eq!(created.upload_grants.len(), 2);

        // Before finalize the job is invisible to workers.
        let report = h.service.job_status(&created.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Pending);
        assert!(h.queue.is_empty());

        for grant in &created.upload_grants {
            h.storage.upload(&grant.key, b"Hello", "text/markdown").unwrap();
        }
        h.service
            .finalize_job(&created.job_id, &[Some("e1".to_string()), None])
            .unwrap();

        let report = h.service.job_status(&created.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Queued);
        assert_eq!(h.queue.dequeue().unwrap(), Some(created.job_id.clone()));

        let inputs = input_repo::list_for_job(&h.db, &created.job_id).unwrap();
        assert_eq!(inputs[0].etag.as_deref(), Some("e1"));
        assert!(inputs[1].etag.is_none());
    }

    #[test]
    fn test_double_finalize_rejected() {
        let h = harness();
        let created = h
            .service
            .create_job("markdown-converter", &[md_file("a.md")], serde_json::json!({}), None)
            .unwrap();

        h.service.finalize_job(&created.job_id, &[]).unwrap();
        let err = h.service.finalize_job(&created.job_id, &[]).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Transition(TransitionError::StateMismatch { .. })
        ));
        // Only one enqueue happened.
        assert_eq!(h.queue.len(), 1);
    }

    #[test]
    fn test_create_job_validation() {
        let h = harness();

        assert!(matches!(
            h.service
                .create_job("no-such-tool", &[md_file("a.md")], serde_json::json!({}), None),
            Err(SubmitError::UnknownTool(_))
        ));

        assert!(matches!(
            h.service
                .create_job("markdown-converter", &[], serde_json::json!({}), None),
            Err(SubmitError::NoInputFiles)
        ));

        let too_many: Vec<NewJobFile> =
            (0..21).map(|i| md_file(&format!("f{}.md", i))).collect();
        assert!(matches!(
            h.service
                .create_job("markdown-converter", &too_many, serde_json::json!({}), None),
            Err(SubmitError::TooManyFiles { max: 20, got: 21 })
        ));

        assert!(matches!(
            h.service.create_job(
                "image-resize",
                &[md_file("a.png")],
                serde_json::json!({ "width": 0 }),
                None
            ),
            Err(SubmitError::InvalidParams(_))
        ));

        // Nothing was persisted for any rejected submission.
        assert!(job_repo::list_ids_by_status(&h.db, JobStatus::Pending)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_status_includes_download_grants_when_completed() {
        let h = harness();
        let created = h
            .service
            .create_job("markdown-converter", &[md_file("a.md")], serde_json::json!({}), None)
            .unwrap();
        let id = created.job_id.clone();

        // Walk the job to COMPLETED by hand and record an output.
        h.service.finalize_job(&id, &[]).unwrap();
        job_repo::transition(&h.db, &id, JobStatus::Queued, JobStatus::Processing, None).unwrap();
        h.storage
            .upload(&format!("jobs/{}/outputs/converted.md", id), b"x", "text/markdown")
            .unwrap();
        output_repo::insert(
            &h.db,
            &output_repo::OutputRow {
                job_id: id.clone(),
                filename: "converted.md".to_string(),
                mime_type: "text/markdown".to_string(),
                size_bytes: 1,
                storage_key: format!("jobs/{}/outputs/converted.md", id),
            },
        )
        .unwrap();
        job_repo::transition(&h.db, &id, JobStatus::Processing, JobStatus::Completed, Some(100))
            .unwrap();

        let report = h.service.job_status(&id).unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.outputs[0].name, "converted.md");
        assert!(report.outputs[0].url.starts_with("file://"));
    }

    #[test]
    fn test_retry_only_from_failed() {
        let h = harness();
        let created = h
            .service
            .create_job("markdown-converter", &[md_file("a.md")], serde_json::json!({}), None)
            .unwrap();
        let id = created.job_id.clone();

        // Not failed yet.
        assert!(matches!(
            h.service.retry_job(&id),
            Err(SubmitError::Transition(_))
        ));

        job_repo::fail(&h.db, &id, JobErrorCode::Processing, "boom").unwrap();
        h.service.retry_job(&id).unwrap();

        let report = h.service.job_status(&id).unwrap();
        assert_eq!(report.status, JobStatus::Queued);
        assert!(report.error_code.is_none());
        assert_eq!(h.queue.dequeue().unwrap(), Some(id));
    }

    #[test]
    fn test_unknown_job_ids() {
        let h = harness();
        assert!(matches!(
            h.service.job_status("nope"),
            Err(SubmitError::JobNotFound(_))
        ));
        assert!(matches!(
            h.service.finalize_job("nope", &[]),
            Err(SubmitError::JobNotFound(_))
        ));
        assert!(matches!(
            h.service.retry_job("nope"),
            Err(SubmitError::JobNotFound(_))
        ));
    }
}
