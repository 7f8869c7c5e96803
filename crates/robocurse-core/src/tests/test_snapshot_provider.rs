use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{Duration, TimeZone, Utc};

use crate::models::snapshot::VolumeKey;
use crate::snapshot_provider::{OsSnapshot, SnapshotError, SnapshotProvider};

/// In-memory snapshot facility. Snapshots get sequential ids and strictly
/// increasing creation times; failures are injectable per operation.
pub struct TestSnapshotProvider {
    volumes: Mutex<HashMap<String, Vec<OsSnapshot>>>,
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    fail_create: Mutex<bool>,
    fail_delete: Mutex<bool>,
    fail_list: Mutex<bool>,
}

impl TestSnapshotProvider {
    pub fn new() -> Self {
        Self {
            volumes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            create_calls: AtomicUsize::new(0),
            fail_create: Mutex::new(false),
            fail_delete: Mutex::new(false),
            fail_list: Mutex::new(false),
        }
    }

    /// Pre-populate a volume with existing (external or owned) snapshots.
    pub fn with_existing(self, volume: &VolumeKey, count: usize) -> Self {
        for _ in 0..count {
            self.add_snapshot(volume);
        }
        self
    }

    pub fn add_snapshot(&self, volume: &VolumeKey) -> OsSnapshot {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = OsSnapshot {
            shadow_id: format!("{{00000000-0000-4000-8000-{:012}}}", seq),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(seq as i64),
            view_path: format!("\\\\?\\GLOBALROOT\\Device\\ShadowCopy{}", seq),
        };
        self.volumes
            .lock()
            .expect("lock poisoned")
            .entry(volume.to_string())
            .or_default()
            .push(snapshot.clone());
        snapshot
    }

    pub fn set_fail_create(&self, fail: bool) {
        *self.fail_create.lock().expect("lock poisoned") = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        *self.fail_delete.lock().expect("lock poisoned") = fail;
    }

    pub fn set_fail_list(&self, fail: bool) {
        *self.fail_list.lock().expect("lock poisoned") = fail;
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_count(&self, volume: &VolumeKey) -> usize {
        self.volumes
            .lock()
            .expect("lock poisoned")
            .get(&volume.to_string())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Remove a snapshot behind the registry's back, simulating external
    /// deletion.
    pub fn remove_externally(&self, volume: &VolumeKey, shadow_id: &str) {
        if let Some(snapshots) = self
            .volumes
            .lock()
            .expect("lock poisoned")
            .get_mut(&volume.to_string())
        {
            snapshots.retain(|s| s.shadow_id != shadow_id);
        }
    }
}

impl Default for TestSnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for TestSnapshotProvider {
    fn create(&self, volume: &VolumeKey) -> Result<OsSnapshot, SnapshotError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_create.lock().expect("lock poisoned") {
            return Err(SnapshotError::CreateFailed {
                volume: volume.to_string(),
                message: "injected create failure".to_string(),
            });
        }
        Ok(self.add_snapshot(volume))
    }

    fn delete(&self, volume: &VolumeKey, shadow_id: &str) -> Result<(), SnapshotError> {
        if *self.fail_delete.lock().expect("lock poisoned") {
            return Err(SnapshotError::DeleteFailed {
                shadow_id: shadow_id.to_string(),
                message: "injected delete failure".to_string(),
            });
        }
        let mut volumes = self.volumes.lock().expect("lock poisoned");
        let snapshots = volumes
            .get_mut(&volume.to_string())
            .ok_or_else(|| SnapshotError::DeleteFailed {
                shadow_id: shadow_id.to_string(),
                message: "volume has no snapshots".to_string(),
            })?;
        let before = snapshots.len();
        snapshots.retain(|s| s.shadow_id != shadow_id);
        if snapshots.len() == before {
            return Err(SnapshotError::DeleteFailed {
                shadow_id: shadow_id.to_string(),
                message: "no such snapshot".to_string(),
            });
        }
        Ok(())
    }

    fn list(&self, volume: &VolumeKey) -> Result<Vec<OsSnapshot>, SnapshotError> {
        if *self.fail_list.lock().expect("lock poisoned") {
            return Err(SnapshotError::ListFailed {
                volume: volume.to_string(),
                message: "injected list failure".to_string(),
            });
        }
        Ok(self
            .volumes
            .lock()
            .expect("lock poisoned")
            .get(&volume.to_string())
            .cloned()
            .unwrap_or_default())
    }
}
