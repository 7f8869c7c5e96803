use thiserror::Error;

use crate::copy_client::CopyError;
use crate::file_system::FsError;
use crate::snapshot_provider::SnapshotError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Copy tool error: {0}")]
    CopyError(#[from] CopyError),

    #[error("File system error: {0}")]
    FileSystemError(#[from] FsError),

    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),

    #[error("Snapshot limit exceeded on {volume}: {total} snapshots present, cap is {cap}")]
    SnapshotCapExceeded {
        volume: String,
        total: usize,
        cap: u32,
    },

    #[error("Chunking error: {0}")]
    ChunkingError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}
