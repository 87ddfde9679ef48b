//! Output repository — result files persisted by the worker on completion.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// One produced result file. Written exactly once, immutable thereafter.
#[derive(Debug, Clone)]
pub struct OutputRow {
    pub job_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Actual on-disk size (from stat), not any declared size.
    pub size_bytes: i64,
    pub storage_key: String,
}

impl OutputRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            filename: row.get("filename")?,
            mime_type: row.get("mime_type")?,
            size_bytes: row.get("size_bytes")?,
            storage_key: row.get("storage_key")?,
        })
    }
}

pub fn insert(db: &Database, output: &OutputRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_outputs (job_id, filename, mime_type, size_bytes, storage_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                output.job_id,
                output.filename,
                output.mime_type,
                output.size_bytes,
                output.storage_key,
            ],
        )?;
        Ok(())
    })
}

pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<OutputRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM job_outputs WHERE job_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![job_id], OutputRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM job_outputs WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::{self, JobRow};

    #[test]
    fn test_insert_and_list() {
        let db = Database::open_in_memory().unwrap();
        job_repo::insert(
            &db,
            &JobRow::new("j1".to_string(), "image-resize".to_string(), None, None),
        )
        .unwrap();

        insert(
            &db,
            &OutputRow {
                job_id: "j1".to_string(),
                filename: "photo-resized.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                size_bytes: 2048,
                storage_key: "jobs/j1/outputs/photo-resized.jpg".to_string(),
            },
        )
        .unwrap();

        let outputs = list_for_job(&db, "j1").unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].size_bytes, 2048);
        assert_eq!(count_for_job(&db, "j1").unwrap(), 1);
        assert_eq!(count_for_job(&db, "other").unwrap(), 0);
    }
}
