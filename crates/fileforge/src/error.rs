use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No valid input files produced any output")]
    NoValidInput,

    #[error("Failed to read input '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process {filename}: {reason}")]
    FileFailed { filename: String, reason: String },

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("Failed to process DOCX: {0}")]
    DocxProcessing(String),

    #[error("Failed to write output '{path}': {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("No processor registered for tool '{0}'")]
    MissingProcessor(String),

    #[error("Processor declared output '{filename}' but no such file exists in the working directory")]
    OutputMissing { filename: String },

    #[error("Job {0} not found")]
    JobNotFound(String),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Job must declare at least one input file")]
    NoInputFiles,

    #[error("Too many input files: {got} exceeds limit of {max}")]
    TooManyFiles { max: usize, got: usize },

    #[error("Invalid tool parameters: {0}")]
    InvalidParams(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error(transparent)]
    Transition(#[from] crate::db::job_repo::TransitionError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Stable error codes recorded on a failed job, alongside the human-readable
/// message. Clients branch on the code, not the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorCode {
    Validation,
    MissingProcessor,
    NoValidInput,
    OutputMissing,
    InvalidTransition,
    Storage,
    Database,
    Processing,
}

impl JobErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorCode::Validation => "VALIDATION",
            JobErrorCode::MissingProcessor => "MISSING_PROCESSOR",
            JobErrorCode::NoValidInput => "NO_VALID_INPUT",
            JobErrorCode::OutputMissing => "OUTPUT_MISSING",
            JobErrorCode::InvalidTransition => "INVALID_TRANSITION",
            JobErrorCode::Storage => "STORAGE",
            JobErrorCode::Database => "DATABASE",
            JobErrorCode::Processing => "PROCESSING",
        }
    }
}

impl std::fmt::Display for JobErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, FileforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(JobErrorCode::MissingProcessor.as_str(), "MISSING_PROCESSOR");
        assert_eq!(JobErrorCode::NoValidInput.as_str(), "NO_VALID_INPUT");
        assert_eq!(JobErrorCode::InvalidTransition.as_str(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_process_error_includes_filename() {
        let err = ProcessError::FileFailed {
            filename: "broken.pdf".to_string(),
            reason: "invalid xref table".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("broken.pdf"));
        assert!(msg.contains("invalid xref table"));
    }
}
