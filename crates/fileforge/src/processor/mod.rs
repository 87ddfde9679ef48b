//! Per-tool processing logic behind a uniform contract.
//!
//! Processors operate purely on local files the worker has already
//! materialized into the working directory; they perform no storage or queue
//! I/O of their own. That isolation keeps them testable with plain files and
//! keeps failure handling centralized in the worker loop.

pub mod image_resize;
pub mod markdown;
pub mod pdf_merge;

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::ProcessError;

/// Everything a processor gets to see for one job.
pub struct ProcessContext {
    pub job_id: String,
    /// Opaque tool parameters, already schema-validated at submission.
    pub params: Value,
    /// Local input paths, in declared processing order.
    pub input_files: Vec<PathBuf>,
    /// Scratch directory; outputs must be written here under their declared
    /// filename. Removed by the worker after the job, success or failure.
    pub working_dir: PathBuf,
}

impl ProcessContext {
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn param_u32(&self, name: &str) -> Option<u32> {
        self.params
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn param_bool(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(Value::as_bool)
    }
}

/// One declared result file, written to the working directory.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// Object key the worker will upload this file to.
    pub storage_key: String,
    /// Filename within the working directory (and for the client).
    pub filename: String,
    pub mime_type: String,
}

#[derive(Debug, Default)]
pub struct ProcessResult {
    pub outputs: Vec<OutputFile>,
    /// Non-fatal per-file notes (skipped formats, suspicious extractions).
    pub warnings: Vec<String>,
}

pub trait Processor: Send + Sync {
    fn slug(&self) -> &'static str;

    fn process(&self, ctx: &ProcessContext) -> Result<ProcessResult, ProcessError>;
}

/// Immutable slug-to-processor mapping, assembled once at startup and passed
/// by reference into the worker loop. A job referencing an unregistered slug
/// fails that job; it never crashes the worker.
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Box<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Self {
            processors: processors.into_iter().map(|p| (p.slug(), p)).collect(),
        }
    }

    /// Registry with all built-in processors.
    pub fn builtin() -> Self {
        Self::new(vec![
            Box::new(pdf_merge::PdfMergeProcessor),
            Box::new(image_resize::ImageResizeProcessor),
            Box::new(markdown::MarkdownProcessor),
        ])
    }

    pub fn resolve(&self, slug: &str) -> Option<&dyn Processor> {
        self.processors.get(slug).map(|p| p.as_ref())
    }

    pub fn slugs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.processors.keys().copied()
    }
}

/// Conventional object key for a job output file.
pub(crate) fn output_key(job_id: &str, filename: &str) -> String {
    format!("jobs/{}/outputs/{}", job_id, filename)
}
