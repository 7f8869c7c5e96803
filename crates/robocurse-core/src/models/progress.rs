use serde::{Deserialize, Serialize};

/// Non-blocking view of a single worker's streaming progress buffer.
///
/// `bytes_copied` is completed-file bytes plus bytes observed of the current
/// file, so successive snapshots are monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub current_file: Option<String>,
    pub current_file_bytes: u64,
    pub line_count: u64,
    pub parse_success: bool,
}

impl ProgressSnapshot {
    pub fn empty() -> Self {
        Self {
            bytes_copied: 0,
            files_copied: 0,
            current_file: None,
            current_file_bytes: 0,
            line_count: 0,
            parse_success: true,
        }
    }
}

/// One row of the copy tool's final statistics block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TallyRow {
    pub total: u64,
    pub copied: u64,
    pub skipped: u64,
    pub mismatched: u64,
    pub failed: u64,
    pub extras: u64,
}

/// Authoritative end-of-job totals parsed from the worker's log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CopyTally {
    pub dirs: TallyRow,
    pub files: TallyRow,
    pub bytes: TallyRow,
    pub speed_bytes_per_sec: Option<u64>,
}

/// Run-wide aggregated progress for observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunProgress {
    pub total_bytes: u64,
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub rate_bytes_per_sec: u64,
    pub eta_secs: Option<u64>,
}
