//! Filesystem-backed object store.
//!
//! Objects live under a root directory, addressed by slash-separated keys.
//! Grants are `file://` URLs with the same validity window a real object
//! store would attach to a pre-signed URL; clients with filesystem access
//! read/write the path directly.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::StorageError;
use crate::sanitize;

use super::{FileMeta, OutputRef, StorageGateway, TransferGrant};

pub struct FsStorageGateway {
    root: PathBuf,
    grant_ttl: chrono::Duration,
}

impl FsStorageGateway {
    pub fn new<P: AsRef<Path>>(root: P, grant_ttl: chrono::Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            grant_ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key to a path under the root, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn grant_for(&self, key: String, name: String) -> TransferGrant {
        let url = format!("file://{}", self.root.join(&key).display());
        TransferGrant {
            key,
            url,
            name,
            expires_at: Utc::now() + self.grant_ttl,
        }
    }
}

impl StorageGateway for FsStorageGateway {
    fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    fn upload(&self, key: &str, bytes: &[u8], _mime_type: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        // Object-store semantics: an upload to an existing key overwrites it.
        std::fs::write(&path, bytes).map_err(|e| StorageError::WriteFile { path, source: e })
    }

    fn create_upload_grants(
        &self,
        job_id: &str,
        files: &[FileMeta],
    ) -> Result<Vec<TransferGrant>, StorageError> {
        files
            .iter()
            .map(|file| {
                let safe = sanitize::safe_filename(&file.name);
                let key = format!(
                    "jobs/{}/inputs/{}-{}",
                    job_id,
                    uuid::Uuid::new_v4(),
                    safe
                );
                Ok(self.grant_for(key, file.name.clone()))
            })
            .collect()
    }

    fn create_download_grants(
        &self,
        _job_id: &str,
        outputs: &[OutputRef],
    ) -> Result<Vec<TransferGrant>, StorageError> {
        outputs
            .iter()
            .map(|output| {
                // Validate the key before signing anything for it.
                self.resolve(&output.key)?;
                Ok(self.grant_for(output.key.clone(), output.name.clone()))
            })
            .collect()
    }
}
