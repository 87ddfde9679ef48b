//! Object storage abstraction.
//!
//! The worker and the submission service only see this trait; the actual
//! bytes move either through `download`/`upload` (worker side) or through
//! time-limited transfer grants handed to the client (submission side), which
//! bypass the application tier entirely.

pub mod filesystem;

pub use filesystem::FsStorageGateway;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;

/// Declared metadata for a file about to be uploaded.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Reference to a stored output for which a download grant is requested.
#[derive(Debug, Clone)]
pub struct OutputRef {
    pub key: String,
    pub name: String,
}

/// A pre-authorized, time-limited transfer URL for one object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferGrant {
    pub key: String,
    pub url: String,
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

pub trait StorageGateway: Send + Sync {
    fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    fn upload(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<(), StorageError>;

    /// Issues one upload grant per declared file, minting fresh object keys
    /// under the job's input prefix.
    fn create_upload_grants(
        &self,
        job_id: &str,
        files: &[FileMeta],
    ) -> Result<Vec<TransferGrant>, StorageError>;

    /// Issues one download grant per existing output object.
    fn create_download_grants(
        &self,
        job_id: &str,
        outputs: &[OutputRef],
    ) -> Result<Vec<TransferGrant>, StorageError>;
}
