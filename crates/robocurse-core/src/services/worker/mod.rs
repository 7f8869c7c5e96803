pub mod command_builder;
pub mod exit_code;
pub mod job_runner;
pub mod log_summary;
pub mod progress;
pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::chunk::Chunk;
use crate::models::progress::{CopyTally, ProgressSnapshot};
use exit_code::ExitClassification;

/// Outcome of a finished worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitInfo {
    pub exit_code: i32,
    pub classification: ExitClassification,
    /// Authoritative totals from the worker's log; absent when the log had
    /// no stats block (killed worker, truncated log).
    pub tally: Option<CopyTally>,
}

/// A live worker copying one chunk.
pub trait ActiveJob: Send {
    fn chunk_id(&self) -> u64;

    fn pid(&self) -> u32;

    /// Non-blocking read of the streaming progress aggregate.
    fn progress(&self) -> ProgressSnapshot;

    fn has_exited(&mut self) -> bool;

    /// Block up to `timeout` for process exit, then interpret the result.
    fn wait(&mut self, timeout: Duration) -> Result<ExitInfo, AppError>;

    /// Request termination: grace period for a clean exit, then a hard kill
    /// of the process tree. Idempotent.
    fn stop(&mut self, grace: Duration);

    fn extras_seen(&self) -> bool;
}

/// Seam between the orchestrator and worker processes, so scheduling logic
/// is testable without spawning real copy tools.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, chunk: &mut Chunk, log_path: &Path) -> Result<Box<dyn ActiveJob>, AppError>;
}

/// Per-chunk log file location: `<log_root>/<date>/chunk-<id>.log`.
pub fn chunk_log_path(log_root: &Path, now: DateTime<Utc>, chunk_id: u64) -> PathBuf {
    log_root
        .join(now.format("%Y-%m-%d").to_string())
        .join(format!("chunk-{}.log", chunk_id))
}
