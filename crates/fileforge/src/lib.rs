//! Fileforge — an asynchronous file-processing job pipeline.
//!
//! Clients submit jobs against a catalog of tools (PDF merge, image resize,
//! markdown conversion), upload their input files through storage grants, and
//! poll for results. A pool of worker threads consumes the job queue,
//! drives each job through a strict status state machine persisted in
//! SQLite, and uploads results back into object storage.
//!
//! The crate is the whole system: [`submit::JobService`] is the submission
//! boundary, [`worker::WorkerPool`] the execution side, and the two share
//! the database, queue and storage abstractions.

pub mod config;
pub mod db;
pub mod error;
pub mod processor;
pub mod queue;
pub mod sanitize;
pub mod state;
pub mod storage;
pub mod submit;
pub mod tools;
pub mod worker;

pub use config::Config;
pub use db::Database;
pub use error::{FileforgeError, Result};
pub use processor::ProcessorRegistry;
pub use queue::{ChannelQueue, JobQueue};
pub use state::JobStatus;
pub use storage::{FsStorageGateway, StorageGateway};
pub use submit::JobService;
pub use tools::ToolRegistry;
pub use worker::{JobRunner, WorkerPool};
