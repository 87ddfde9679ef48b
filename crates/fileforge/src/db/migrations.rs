//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: "CREATE TABLE jobs (
                id           TEXT PRIMARY KEY,
                tool_slug    TEXT NOT NULL,
                user_id      TEXT,
                status       TEXT NOT NULL DEFAULT 'pending',
                progress     INTEGER NOT NULL DEFAULT 0,
                params       TEXT,
                error_code   TEXT,
                error_message TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
              );
              CREATE INDEX idx_jobs_status ON jobs(status);",
    },
    Migration {
        version: 2,
        description: "create_job_inputs_table",
        sql: "CREATE TABLE job_inputs (
                job_id       TEXT NOT NULL REFERENCES jobs(id),
                ordinal      INTEGER NOT NULL,
                filename     TEXT NOT NULL,
                mime_type    TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                storage_key  TEXT NOT NULL,
                etag         TEXT,
                PRIMARY KEY (job_id, ordinal)
              );",
    },
    Migration {
        version: 3,
        description: "create_job_outputs_table",
        sql: "CREATE TABLE job_outputs (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id       TEXT NOT NULL REFERENCES jobs(id),
                filename     TEXT NOT NULL,
                mime_type    TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                storage_key  TEXT NOT NULL
              );
              CREATE INDEX idx_job_outputs_job ON job_outputs(job_id);",
    },
];

/// Applies all pending migrations.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TEXT NOT NULL
        )",
        [],
    )?;

    for migration in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM _migrations WHERE version = ?1)",
            [migration.version],
            |r| r.get(0),
        )?;

        if applied {
            continue;
        }

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        log::debug!(
            "Applied migration {}: {}",
            migration.version,
            migration.description
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_all_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[test]
    fn test_tables_exist_after_migration() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        for table in ["jobs", "job_inputs", "job_outputs"] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {}", table);
        }
    }
}
