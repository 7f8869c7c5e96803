pub mod locked_file;

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::file_system::atomic_write;
use crate::models::settings::AppConfig;
use locked_file::LockedFile;

/// Reads and writes the authoritative configuration document.
///
/// Writes serialize through an advisory lock and land via atomic replace,
/// so concurrent readers see either the old or the new document in full.
pub struct ConfigStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing file yields defaults. Optional keys fall
    /// back to their defaults, unknown keys are ignored.
    pub fn load(&self) -> Result<AppConfig, AppError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("config file {} absent, using defaults", self.path.display());
                return Ok(AppConfig::default());
            }
            Err(e) => {
                return Err(AppError::ConfigError(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&raw)
            .map_err(|e| AppError::ConfigError(format!("{}: {}", self.path.display(), e)))
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), AppError> {
        let _lock = LockedFile::acquire(&self.lock_path)
            .map_err(|e| AppError::ConfigError(format!("config lock: {}", e)))?;
        self.write_locked(config)
    }

    /// Read-modify-write under the lock; the closure sees the freshest
    /// on-disk state, so concurrent updaters never lose each other's writes.
    pub fn update<R>(
        &self,
        mutate: impl FnOnce(&mut AppConfig) -> R,
    ) -> Result<R, AppError> {
        let _lock = LockedFile::acquire(&self.lock_path)
            .map_err(|e| AppError::ConfigError(format!("config lock: {}", e)))?;
        let mut config = self.load()?;
        let result = mutate(&mut config);
        self.write_locked(&config)?;
        Ok(result)
    }

    fn write_locked(&self, config: &AppConfig) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| AppError::SerializationError(e.to_string()))?;
        atomic_write(&self.path, json.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("{}: {}", self.path.display(), e)))
    }
}
