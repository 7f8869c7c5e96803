pub mod process_snapshot_provider;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::snapshot::VolumeKey;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("Snapshot creation failed on {volume}: {message}")]
    CreateFailed { volume: String, message: String },

    #[error("Snapshot deletion failed for {shadow_id}: {message}")]
    DeleteFailed { shadow_id: String, message: String },

    #[error("Snapshot listing failed on {volume}: {message}")]
    ListFailed { volume: String, message: String },

    #[error("Snapshot facility not available: {0}")]
    Unavailable(String),

    #[error("Remote execution failed on {server}: {message}")]
    RemoteError { server: String, message: String },
}

/// One snapshot as the OS reports it, whether or not we own it.
#[derive(Debug, Clone, PartialEq)]
pub struct OsSnapshot {
    pub shadow_id: String,
    pub created_at: DateTime<Utc>,
    /// OS-exposed read-only path of the snapshot view.
    pub view_path: String,
}

/// Seam over the OS volume snapshot facility. Remote volumes run the same
/// operations over a remote execution channel, addressed by the
/// `server|volume` half of the key.
pub trait SnapshotProvider: Send + Sync {
    fn create(&self, volume: &VolumeKey) -> Result<OsSnapshot, SnapshotError>;

    fn delete(&self, volume: &VolumeKey, shadow_id: &str) -> Result<(), SnapshotError>;

    /// All snapshots currently present on the volume, creation order.
    fn list(&self, volume: &VolumeKey) -> Result<Vec<OsSnapshot>, SnapshotError>;
}
