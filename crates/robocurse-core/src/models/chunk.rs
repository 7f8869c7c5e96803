use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
}

/// One independently copyable unit of work: a subtree (or just the loose
/// files of one directory when `files_only` is set).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: u64,
    pub source: String,
    pub destination: String,
    pub estimated_bytes: u64,
    pub estimated_files: u64,
    /// Depth below the profile's source root at which this chunk was cut.
    pub depth: u32,
    /// Copy only the files directly in `source`, leaving subdirectories to
    /// other chunks.
    pub files_only: bool,

    pub status: ChunkStatus,
    pub retry_count: u32,
    pub retry_after: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Chunk {
    pub fn new(
        id: u64,
        source: String,
        destination: String,
        estimated_bytes: u64,
        estimated_files: u64,
        depth: u32,
        files_only: bool,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            estimated_bytes,
            estimated_files,
            depth,
            files_only,
            status: ChunkStatus::Pending,
            retry_count: 0,
            retry_after: None,
            last_exit_code: None,
            last_error: None,
            args: Vec::new(),
        }
    }

    /// Whether the chunk may be admitted now, honoring its backoff deadline.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.retry_after {
            Some(after) => after <= now,
            None => true,
        }
    }
}

/// Thread-safe monotonically increasing chunk id source, reset only at run
/// boundaries.
pub struct ChunkIdAllocator {
    next: AtomicU64,
}

impl ChunkIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.next.store(1, Ordering::SeqCst);
    }
}

impl Default for ChunkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
