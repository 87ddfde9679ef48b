//! Job repository — CRUD and guarded status transitions for the `jobs` table.

use rusqlite::{params, Row};
use thiserror::Error;

use crate::error::JobErrorCode;
use crate::state::{is_valid_transition, JobStatus};

use super::{Database, DatabaseError};

/// A job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub tool_slug: String,
    pub user_id: Option<String>,
    pub status: JobStatus,
    pub progress: i64,
    /// Opaque tool parameters as JSON text.
    pub params: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    /// Builds a fresh PENDING row for a newly submitted job.
    pub fn new(id: String, tool_slug: String, user_id: Option<String>, params: Option<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            tool_slug,
            user_id,
            status: JobStatus::Pending,
            progress: 0,
            params,
            error_code: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let id: String = row.get("id")?;
        let status_str: String = row.get("status")?;
        let status = JobStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown job status '{}' for job {}", status_str, id).into(),
            )
        })?;
        Ok(Self {
            id,
            tool_slug: row.get("tool_slug")?,
            user_id: row.get("user_id")?,
            status,
            progress: row.get("progress")?,
            params: row.get("params")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A status transition was rejected, either by the state-machine table or by
/// the conditional write observing a different current status.
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Illegal transition {from} -> {to}")]
    Invalid { from: JobStatus, to: JobStatus },

    #[error("Job {id} is not in status {expected} (concurrent writer won)")]
    StateMismatch { id: String, expected: JobStatus },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl TransitionError {
    pub fn code(&self) -> JobErrorCode {
        match self {
            TransitionError::Invalid { .. } | TransitionError::StateMismatch { .. } => {
                JobErrorCode::InvalidTransition
            }
            TransitionError::Database(_) => JobErrorCode::Database,
        }
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, tool_slug, user_id, status, progress, params,
             error_code, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.tool_slug,
                job.user_id,
                job.status.as_str(),
                job.progress,
                job.params,
                job.error_code,
                job.error_message,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists job ids currently in the given status, oldest first.
pub fn list_ids_by_status(db: &Database, status: JobStatus) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id FROM jobs WHERE status = ?1 ORDER BY created_at ASC")?;
        let ids = stmt
            .query_map(params![status.as_str()], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Moves a job from `from` to `to` with a conditional update.
///
/// The `WHERE status = from` clause is the compare-and-swap: if another
/// consumer already moved the job (duplicate queue delivery), zero rows are
/// affected and the caller gets `StateMismatch` instead of silently
/// double-processing. Optionally sets progress in the same write.
pub fn transition(
    db: &Database,
    id: &str,
    from: JobStatus,
    to: JobStatus,
    progress: Option<i64>,
) -> Result<(), TransitionError> {
    if !is_valid_transition(from, to) {
        return Err(TransitionError::Invalid { from, to });
    }

    let changed = db.with_conn(|conn| {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = match progress {
            Some(p) => conn.execute(
                "UPDATE jobs SET status = ?1, progress = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to.as_str(), p, now, id, from.as_str()],
            )?,
            None => conn.execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now, id, from.as_str()],
            )?,
        };
        Ok(changed)
    })?;

    if changed == 0 {
        return Err(TransitionError::StateMismatch {
            id: id.to_string(),
            expected: from,
        });
    }

    Ok(())
}

/// Updates the progress checkpoint of a job. Progress only moves forward
/// within an attempt, so the write is guarded against regressions.
pub fn set_progress(db: &Database, id: &str, progress: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET progress = ?1, updated_at = ?2
             WHERE id = ?3 AND progress <= ?1",
            params![progress, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    })
}

/// Marks a job FAILED, recording the error code and message and resetting
/// progress to 0 (a failed job carries no partial-completion expectation).
///
/// Guarded to non-terminal states so a late failure write can never stomp a
/// COMPLETED job.
pub fn fail(
    db: &Database,
    id: &str,
    code: JobErrorCode,
    message: &str,
) -> Result<(), DatabaseError> {
    let changed = db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', progress = 0, error_code = ?1,
             error_message = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'queued', 'processing')",
            params![code.as_str(), message, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed)
    })?;

    if changed == 0 {
        log::warn!(
            "Refused to fail job {}: not in a failable state (code {})",
            id,
            code
        );
    }
    Ok(())
}

/// Clears error fields on retry (FAILED -> QUEUED is done via `transition`).
pub fn clear_error(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET error_code = NULL, error_message = NULL, progress = 0,
             updated_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    })
}
