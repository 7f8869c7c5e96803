use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProfileOutcome {
    Success,
    Warning,
    Failed,
    /// Profile never ran its queue (pre-flight, snapshot or chunking failure).
    Aborted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndReason {
    Complete,
    StoppedByUser,
    CircuitBreaker,
    SnapshotCapExceeded,
    PreflightFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedChunkDigest {
    pub source: String,
    pub exit_code: Option<i32>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileReport {
    pub name: String,
    pub outcome: ProfileOutcome,
    pub total_chunks: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes_copied: u64,
    pub extras_seen: bool,
    pub failed_chunks: Vec<FailedChunkDigest>,
    pub message: Option<String>,
}

/// End-of-run summary handed to the notification hook. Formatting and
/// transport live outside the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub profiles: Vec<ProfileReport>,
    pub total_chunks: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes_copied: u64,
    /// First errors observed, capped by the driver.
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    pub fn worst_outcome(&self) -> ProfileOutcome {
        let mut worst = ProfileOutcome::Success;
        for profile in &self.profiles {
            worst = match (worst, profile.outcome) {
                (_, ProfileOutcome::Aborted) | (ProfileOutcome::Aborted, _) => {
                    ProfileOutcome::Aborted
                }
                (_, ProfileOutcome::Failed) | (ProfileOutcome::Failed, _) => ProfileOutcome::Failed,
                (_, ProfileOutcome::Warning) | (ProfileOutcome::Warning, _) => {
                    ProfileOutcome::Warning
                }
                _ => ProfileOutcome::Success,
            };
        }
        worst
    }
}
