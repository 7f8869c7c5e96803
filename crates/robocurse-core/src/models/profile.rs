use serde::{Deserialize, Serialize};

use super::schedule::ScheduleConfig;

/// A named source → destination replication pair with its copy policy.
///
/// Profiles are read from config at run start and never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub name: String,
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub options: CopyOptions,
    #[serde(default)]
    pub chunking: ChunkingParams,
    pub snapshots: Option<SnapshotPolicy>,
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyOptions {
    /// Mirror mode: destination extras are purged.
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub exclude_files: Vec<String>,
    /// Inter-packet gap in milliseconds, the copy tool's bandwidth throttle.
    pub inter_packet_gap_ms: Option<u32>,
    /// Copy threads inside a single worker process.
    pub threads_per_worker: Option<u32>,
    /// Retries the copy tool itself performs per file.
    #[serde(default = "default_tool_retries")]
    pub tool_retries: u32,
    #[serde(default = "default_tool_retry_wait")]
    pub tool_retry_wait_secs: u32,
    /// Escalate "extras detected" from success to warning.
    #[serde(default)]
    pub strict_extras: bool,
    /// Escalate "mismatches detected" from warning to error.
    #[serde(default)]
    pub strict_mismatches: bool,
    /// Additional raw arguments, split shell-style.
    #[serde(default)]
    pub extra_args: String,
}

fn default_tool_retries() -> u32 {
    2
}
fn default_tool_retry_wait() -> u32 {
    5
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            mirror: false,
            exclude_dirs: Vec::new(),
            exclude_files: Vec::new(),
            inter_packet_gap_ms: None,
            threads_per_worker: None,
            tool_retries: default_tool_retries(),
            tool_retry_wait_secs: default_tool_retry_wait(),
            strict_extras: false,
            strict_mismatches: false,
            extra_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkMode {
    /// Recursive partitioning: oversized directories are split into a
    /// files-only chunk plus one chunk per child, recursively.
    Smart,
    /// Every immediate child directory becomes one chunk; recursion inside a
    /// chunk is left to the copy tool.
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingParams {
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    #[serde(default = "default_max_chunk_files")]
    pub max_chunk_files: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_chunk_mode")]
    pub mode: ChunkMode,
}

fn default_max_chunk_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}
fn default_max_chunk_files() -> u64 {
    50_000
}
fn default_max_depth() -> u32 {
    5
}
fn default_chunk_mode() -> ChunkMode {
    ChunkMode::Smart
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
            max_chunk_files: default_max_chunk_files(),
            max_depth: default_max_depth(),
            mode: default_chunk_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPolicy {
    #[serde(default)]
    pub source_side: bool,
    #[serde(default)]
    pub destination_side: bool,
    /// Keep snapshots after the run instead of releasing them.
    #[serde(default)]
    pub persist: bool,
    /// Owned snapshots retained per volume after a successful run.
    #[serde(default = "default_keep")]
    pub keep_per_volume: u32,
}

fn default_keep() -> u32 {
    3
}

impl SnapshotPolicy {
    pub fn any_side(&self) -> bool {
        self.source_side || self.destination_side
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            source_side: false,
            destination_side: false,
            persist: false,
            keep_per_volume: default_keep(),
        }
    }
}
