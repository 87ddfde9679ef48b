//! Job lifecycle state machine.
//!
//! Every status write goes through the transition table below; anything not
//! listed is rejected. `Failed` is re-enterable into `Queued` so an operator
//! can retry a job without recreating it.

use serde::{Deserialize, Serialize};

/// Progress checkpoint when the worker begins processing.
pub const PROGRESS_PROCESSING: i64 = 10;
/// Progress checkpoint once all inputs are downloaded.
pub const PROGRESS_DOWNLOADED: i64 = 40;
/// Progress checkpoint once all outputs are uploaded.
pub const PROGRESS_UPLOADED: i64 = 80;
/// Progress checkpoint on completion.
pub const PROGRESS_DONE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// States reachable from `self`.
    pub fn valid_targets(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[JobStatus::Queued, JobStatus::Failed],
            JobStatus::Queued => &[JobStatus::Processing, JobStatus::Failed],
            JobStatus::Processing => &[JobStatus::Completed, JobStatus::Failed],
            JobStatus::Completed => &[],
            // Explicit retry path only.
            JobStatus::Failed => &[JobStatus::Queued],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True iff `from -> to` appears in the transition table.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    from.valid_targets().contains(&to)
}
