use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::file_system::atomic_write;
use crate::models::checkpoint::{Checkpoint, CHECKPOINT_VERSION};

/// Persists the resumption record through atomic replace.
///
/// Saving is best-effort (callers log and carry on); loading never fails:
/// an absent or corrupt file reads as "no checkpoint".
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| AppError::SerializationError(e.to_string()))?;
        atomic_write(&self.path, json.as_bytes()).map_err(|e| {
            AppError::SerializationError(format!("{}: {}", self.path.display(), e))
        })
    }

    pub fn load(&self) -> Option<Checkpoint> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!(
                    "checkpoint {} unreadable, starting fresh: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(checkpoint) if checkpoint.version <= CHECKPOINT_VERSION => Some(checkpoint),
            Ok(checkpoint) => {
                log::warn!(
                    "checkpoint {} has version {} from a newer build, ignoring",
                    self.path.display(),
                    checkpoint.version
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "checkpoint {} corrupt, starting fresh: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    pub fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "could not remove checkpoint {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
