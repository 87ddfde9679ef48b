//! Job execution: the per-job procedure and the thread pool that drives it.

pub mod pool;
pub mod runner;

pub use pool::WorkerPool;
pub use runner::JobRunner;
