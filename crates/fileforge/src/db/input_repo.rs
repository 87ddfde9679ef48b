//! Input repository — the uploaded source files belonging to a job.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// One declared input file. Immutable after creation except for the etag,
/// which is confirmed at finalize time.
#[derive(Debug, Clone)]
pub struct InputRow {
    pub job_id: String,
    /// Processing order within the job, stable once set.
    pub ordinal: i64,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub etag: Option<String>,
}

impl InputRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            ordinal: row.get("ordinal")?,
            filename: row.get("filename")?,
            mime_type: row.get("mime_type")?,
            size_bytes: row.get("size_bytes")?,
            storage_key: row.get("storage_key")?,
            etag: row.get("etag")?,
        })
    }
}

pub fn insert(db: &Database, input: &InputRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_inputs (job_id, ordinal, filename, mime_type, size_bytes, storage_key, etag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                input.job_id,
                input.ordinal,
                input.filename,
                input.mime_type,
                input.size_bytes,
                input.storage_key,
                input.etag,
            ],
        )?;
        Ok(())
    })
}

/// Lists a job's inputs in processing order (by ordinal, never by any
/// filesystem or insertion accident).
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<InputRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM job_inputs WHERE job_id = ?1 ORDER BY ordinal ASC")?;
        let rows = stmt
            .query_map(params![job_id], InputRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Records the upload confirmation token for one input.
pub fn set_etag(
    db: &Database,
    job_id: &str,
    ordinal: i64,
    etag: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_inputs SET etag = ?1 WHERE job_id = ?2 AND ordinal = ?3",
            params![etag, job_id, ordinal],
        )?;
        Ok(())
    })
}
