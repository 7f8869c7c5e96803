pub mod process_copy_client;

use std::process::Child;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct CopyOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CopyError {
    #[error("Process error: {message} (exit code: {exit_code:?})")]
    ProcessError {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("copy tool not found on system")]
    ToolNotFound,

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Seam over the external copy tool (robocopy).
///
/// `spawn` launches a live copy process whose stdout the caller streams;
/// `list` runs the tool in list-only mode and blocks for the full
/// enumeration output, so directory profiling sees the same permission and
/// path semantics the real copy will.
pub trait CopyClient: Send + Sync {
    fn spawn(&self, args: &[String]) -> Result<Child, CopyError>;

    fn list(&self, source: &str, max_depth: Option<u32>) -> Result<CopyOutput, CopyError>;

    fn version(&self) -> Result<String, CopyError>;
}
