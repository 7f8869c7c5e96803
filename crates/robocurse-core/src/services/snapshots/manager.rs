use std::sync::Arc;

use crate::config::ConfigStore;
use crate::error::AppError;
use crate::models::settings::SnapshotLimits;
use crate::models::snapshot::{SnapshotRecord, SnapshotSide, VolumeKey};
use crate::snapshot_provider::{OsSnapshot, SnapshotProvider};

/// Creates and deletes OS volume snapshots, with every ownership change
/// written through to the authoritative config registry immediately.
///
/// The crash window between OS creation and registry write is accepted: a
/// snapshot that exists but was never registered reads as external, and
/// external snapshots are never deleted by retention.
pub struct SnapshotManager {
    provider: Arc<dyn SnapshotProvider>,
    config: Arc<ConfigStore>,
}

impl SnapshotManager {
    pub fn new(provider: Arc<dyn SnapshotProvider>, config: Arc<ConfigStore>) -> Self {
        Self { provider, config }
    }

    /// Take a snapshot of `volume` and register it. The registry write
    /// happens before this returns; a failure to persist rolls the OS
    /// snapshot back rather than leaving an untracked owned snapshot.
    pub fn create(
        &self,
        volume: &VolumeKey,
        side: SnapshotSide,
    ) -> Result<SnapshotRecord, AppError> {
        let os_snapshot = self.provider.create(volume)?;
        let record = SnapshotRecord {
            volume: volume.clone(),
            shadow_id: os_snapshot.shadow_id.clone(),
            created_at: os_snapshot.created_at,
            side,
            view_path: os_snapshot.view_path,
        };

        let registered = self.config.update(|config| {
            config
                .snapshot_registry
                .entry(volume.to_string())
                .or_default()
                .push(record.shadow_id.clone());
        });

        if let Err(e) = registered {
            log::error!(
                "snapshot {} created but registry write failed, deleting: {}",
                record.shadow_id,
                e
            );
            if let Err(delete_err) = self.provider.delete(volume, &record.shadow_id) {
                log::error!(
                    "rollback deletion of {} also failed: {}",
                    record.shadow_id,
                    delete_err
                );
            }
            return Err(e);
        }

        log::info!(
            "created snapshot {} on {} ({:?} side)",
            record.shadow_id,
            volume,
            side
        );
        Ok(record)
    }

    /// Delete an owned snapshot. OS deletion comes first; when it fails the
    /// registry entry stays so the snapshot is never orphaned from tracking.
    pub fn delete(&self, record: &SnapshotRecord) -> Result<(), AppError> {
        self.provider.delete(&record.volume, &record.shadow_id)?;
        let key = record.volume.to_string();
        self.config.update(|config| {
            if let Some(ids) = config.snapshot_registry.get_mut(&key) {
                ids.retain(|id| id != &record.shadow_id);
            }
            if config
                .snapshot_registry
                .get(&key)
                .is_some_and(|ids| ids.is_empty())
            {
                config.snapshot_registry.remove(&key);
            }
        })?;
        log::info!("deleted snapshot {} on {}", record.shadow_id, record.volume);
        Ok(())
    }

    /// Registered snapshots still present on the volume, oldest first.
    /// Registry entries the OS no longer knows are dropped from the result
    /// and cleaned out of the registry (orphan sweep).
    pub fn list_ours(&self, volume: &VolumeKey) -> Result<Vec<SnapshotRecord>, AppError> {
        let os_snapshots = self.provider.list(volume)?;
        let registered = self.registered_ids(volume)?;

        let mut ours: Vec<SnapshotRecord> = os_snapshots
            .iter()
            .filter(|snap| registered.iter().any(|id| id == &snap.shadow_id))
            .map(|snap| self.record_from(volume, snap))
            .collect();
        ours.sort_by_key(|r| r.created_at);

        let missing: Vec<String> = registered
            .iter()
            .filter(|id| !os_snapshots.iter().any(|snap| &snap.shadow_id == *id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            log::warn!(
                "{} registered snapshot(s) on {} no longer exist, cleaning registry: {:?}",
                missing.len(),
                volume,
                missing
            );
            self.config.update(|config| {
                if let Some(ids) = config.snapshot_registry.get_mut(&volume.to_string()) {
                    ids.retain(|id| !missing.contains(id));
                }
            })?;
        }

        Ok(ours)
    }

    /// Count ALL snapshots on the volume, ours and external alike, against
    /// the configured hard cap. Exceeding the cap is a fail-fast error that
    /// requires manual intervention; nothing is ever deleted to make room.
    pub fn enforce_hard_cap(
        &self,
        volume: &VolumeKey,
        limits: &SnapshotLimits,
    ) -> Result<(), AppError> {
        let Some(cap) = limits.cap_for(&volume.to_string()) else {
            return Ok(());
        };
        let total = self.provider.list(volume)?.len();
        if total >= cap as usize {
            return Err(AppError::SnapshotCapExceeded {
                volume: volume.to_string(),
                total,
                cap,
            });
        }
        Ok(())
    }

    /// Post-backup retention: evict the OLDEST owned snapshots beyond
    /// `keep`. Returns the number deleted.
    pub fn retain_after_success(
        &self,
        volume: &VolumeKey,
        keep: u32,
    ) -> Result<usize, AppError> {
        let ours = self.list_ours(volume)?;
        if ours.len() <= keep as usize {
            return Ok(0);
        }
        let excess = ours.len() - keep as usize;
        let mut deleted = 0;
        for record in ours.iter().take(excess) {
            match self.delete(record) {
                Ok(()) => {
                    log::info!(
                        "retention evicted snapshot {} on {}",
                        record.shadow_id,
                        volume
                    );
                    deleted += 1;
                }
                Err(e) => log::warn!(
                    "retention could not delete {} on {}: {}",
                    record.shadow_id,
                    volume,
                    e
                ),
            }
        }
        Ok(deleted)
    }

    /// Startup recovery: when a crashed run left more registered snapshots
    /// than `keep`, delete the NEWEST ones, since the newest is most likely
    /// from the incomplete backup.
    pub fn cleanup_crashed_run(
        &self,
        volume: &VolumeKey,
        keep: u32,
    ) -> Result<usize, AppError> {
        let ours = self.list_ours(volume)?;
        if ours.len() <= keep as usize {
            return Ok(0);
        }
        let excess = ours.len() - keep as usize;
        let mut deleted = 0;
        for record in ours.iter().rev().take(excess) {
            match self.delete(record) {
                Ok(()) => {
                    log::warn!(
                        "crashed-run cleanup removed snapshot {} on {}",
                        record.shadow_id,
                        volume
                    );
                    deleted += 1;
                }
                Err(e) => log::warn!(
                    "crashed-run cleanup could not delete {} on {}: {}",
                    record.shadow_id,
                    volume,
                    e
                ),
            }
        }
        Ok(deleted)
    }

    fn registered_ids(&self, volume: &VolumeKey) -> Result<Vec<String>, AppError> {
        let config = self.config.load()?;
        Ok(config
            .snapshot_registry
            .get(&volume.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn record_from(&self, volume: &VolumeKey, snap: &OsSnapshot) -> SnapshotRecord {
        SnapshotRecord {
            volume: volume.clone(),
            shadow_id: snap.shadow_id.clone(),
            created_at: snap.created_at,
            // Side is a creation-time attribute; listings reconstruct
            // records for retention, where side does not matter.
            side: SnapshotSide::Source,
            view_path: snap.view_path.clone(),
        }
    }
}
