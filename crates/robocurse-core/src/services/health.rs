use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file_system::atomic_write;

/// The JSON document external watchdogs poll. The core only ever writes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub phase: String,
    pub profile: String,
    pub total_chunks: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub bytes_complete: u64,
    pub total_bytes: u64,
    pub timestamp: DateTime<Utc>,
    pub stop_requested: bool,
}

/// Writes the status document at a fixed location on an interval. Health is
/// advisory: every I/O failure is swallowed.
pub struct HealthPublisher {
    path: PathBuf,
    interval: Duration,
    last_publish: Mutex<Option<Instant>>,
}

impl HealthPublisher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_publish: Mutex::new(None),
        }
    }

    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("robocurse-status.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish when the interval has elapsed since the last write. Returns
    /// whether a write was attempted.
    pub fn publish_if_due(&self, status: &HealthStatus) -> bool {
        {
            let last = self.last_publish.lock().expect("lock poisoned");
            if let Some(at) = *last {
                if at.elapsed() < self.interval {
                    return false;
                }
            }
        }
        self.publish_now(status);
        true
    }

    pub fn publish_now(&self, status: &HealthStatus) {
        *self.last_publish.lock().expect("lock poisoned") = Some(Instant::now());
        let json = match serde_json::to_string_pretty(status) {
            Ok(json) => json,
            Err(e) => {
                log::debug!("health serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = atomic_write(&self.path, json.as_bytes()) {
            log::debug!("health write to {} failed: {}", self.path.display(), e);
        }
    }
}
