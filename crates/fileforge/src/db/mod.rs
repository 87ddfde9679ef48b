//! Database module for persistent job storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod input_repo;
pub mod job_repo;
pub mod migrations;
pub mod output_repo;

pub use error::DatabaseError;

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). All access is serialized through
/// a `Mutex`, which is fine for SQLite (which serializes writes anyway).
/// WAL mode is enabled for concurrent read performance.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}
