use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::SnapshotRecord;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Persisted resumption record for one run.
///
/// Chunk identity across restarts is the chunk's source path; ids are
/// reallocated when the tree is re-chunked on resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub version: u32,
    /// Stable across restarts of one logical run.
    pub session_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub profile_index: usize,
    pub profile_name: String,
    pub completed_paths: Vec<String>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub bytes_complete: u64,
    pub run_started_at: DateTime<Utc>,
    #[serde(default)]
    pub session_snapshots: Vec<SnapshotRecord>,
}

impl Checkpoint {
    pub fn new(session_id: Uuid, run_started_at: DateTime<Utc>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id,
            saved_at: Utc::now(),
            profile_index: 0,
            profile_name: String::new(),
            completed_paths: Vec::new(),
            completed_count: 0,
            failed_count: 0,
            bytes_complete: 0,
            run_started_at,
            session_snapshots: Vec::new(),
        }
    }

    /// Membership test used to skip already-completed chunks on resume.
    pub fn is_completed(&self, chunk_source: &str) -> bool {
        self.completed_paths.iter().any(|p| p == chunk_source)
    }
}
