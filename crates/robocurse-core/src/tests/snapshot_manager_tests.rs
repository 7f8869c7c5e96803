use std::sync::Arc;

use crate::config::ConfigStore;
use crate::error::AppError;
use crate::models::settings::SnapshotLimits;
use crate::models::snapshot::{SnapshotSide, VolumeKey};
use crate::services::snapshots::SnapshotManager;
use crate::snapshot_provider::SnapshotProvider;
use crate::tests::test_snapshot_provider::TestSnapshotProvider;

struct Fixture {
    manager: SnapshotManager,
    provider: Arc<TestSnapshotProvider>,
    config: Arc<ConfigStore>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(ConfigStore::new(dir.path().join("config.json")));
    let provider = Arc::new(TestSnapshotProvider::new());
    let manager = SnapshotManager::new(
        Arc::clone(&provider) as Arc<dyn SnapshotProvider>,
        Arc::clone(&config),
    );
    Fixture {
        manager,
        provider,
        config,
        _dir: dir,
    }
}

fn volume() -> VolumeKey {
    VolumeKey::local("D:")
}

fn registry_ids(config: &ConfigStore, volume: &VolumeKey) -> Vec<String> {
    config
        .load()
        .unwrap()
        .snapshot_registry
        .get(&volume.to_string())
        .cloned()
        .unwrap_or_default()
}

#[test]
fn create_writes_through_to_the_registry() {
    let f = fixture();
    let record = f.manager.create(&volume(), SnapshotSide::Source).unwrap();

    assert_eq!(record.volume, volume());
    assert_eq!(record.side, SnapshotSide::Source);
    assert!(record.view_path.contains("ShadowCopy"));
    // The registry already knows the snapshot before create() returns.
    assert_eq!(registry_ids(&f.config, &volume()), vec![record.shadow_id]);
}

#[test]
fn delete_removes_os_snapshot_then_registry_entry() {
    let f = fixture();
    let record = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    f.manager.delete(&record).unwrap();

    assert_eq!(f.provider.snapshot_count(&volume()), 0);
    assert!(registry_ids(&f.config, &volume()).is_empty());
}

#[test]
fn failed_os_deletion_keeps_the_registry_entry() {
    let f = fixture();
    let record = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    f.provider.set_fail_delete(true);

    assert!(f.manager.delete(&record).is_err());
    // Entry retained: the registry never orphans a live snapshot.
    assert_eq!(registry_ids(&f.config, &volume()), vec![record.shadow_id]);
}

#[test]
fn list_ours_excludes_external_snapshots() {
    let f = fixture();
    // Two external snapshots surround one of ours.
    f.provider.add_snapshot(&volume());
    let ours = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    f.provider.add_snapshot(&volume());

    let listed = f.manager.list_ours(&volume()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].shadow_id, ours.shadow_id);
}

#[test]
fn list_ours_sweeps_orphaned_registry_entries() {
    let f = fixture();
    let record = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    // The snapshot disappears behind our back (admin deleted it).
    f.provider.remove_externally(&volume(), &record.shadow_id);

    let listed = f.manager.list_ours(&volume()).unwrap();
    assert!(listed.is_empty());
    assert!(registry_ids(&f.config, &volume()).is_empty());
}

#[test]
fn hard_cap_counts_external_snapshots_too() {
    let f = fixture();
    for _ in 0..9 {
        f.provider.add_snapshot(&volume());
    }
    f.manager.create(&volume(), SnapshotSide::Source).unwrap();

    let limits = SnapshotLimits {
        max_total_snapshots: Some(10),
        per_volume: Default::default(),
    };
    // 10 total (9 external + 1 ours) at cap 10: creation must be refused.
    let err = f.manager.enforce_hard_cap(&volume(), &limits).unwrap_err();
    match err {
        AppError::SnapshotCapExceeded { total, cap, .. } => {
            assert_eq!(total, 10);
            assert_eq!(cap, 10);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn hard_cap_passes_under_the_limit() {
    let f = fixture();
    for _ in 0..9 {
        f.provider.add_snapshot(&volume());
    }
    let limits = SnapshotLimits {
        max_total_snapshots: Some(10),
        per_volume: Default::default(),
    };
    assert!(f.manager.enforce_hard_cap(&volume(), &limits).is_ok());
}

#[test]
fn no_cap_means_no_enforcement() {
    let f = fixture();
    for _ in 0..100 {
        f.provider.add_snapshot(&volume());
    }
    let limits = SnapshotLimits::default();
    assert!(f.manager.enforce_hard_cap(&volume(), &limits).is_ok());
}

#[test]
fn per_volume_cap_overrides_the_global_cap() {
    let f = fixture();
    for _ in 0..5 {
        f.provider.add_snapshot(&volume());
    }
    let mut limits = SnapshotLimits {
        max_total_snapshots: Some(100),
        per_volume: Default::default(),
    };
    limits.per_volume.insert("D:".to_string(), 5);
    assert!(f.manager.enforce_hard_cap(&volume(), &limits).is_err());
}

#[test]
fn retain_after_success_evicts_oldest_beyond_keep() {
    let f = fixture();
    let first = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    let second = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    let third = f.manager.create(&volume(), SnapshotSide::Source).unwrap();

    let deleted = f.manager.retain_after_success(&volume(), 2).unwrap();
    assert_eq!(deleted, 1);

    let remaining: Vec<String> = f
        .manager
        .list_ours(&volume())
        .unwrap()
        .into_iter()
        .map(|r| r.shadow_id)
        .collect();
    assert!(!remaining.contains(&first.shadow_id), "oldest must go");
    assert!(remaining.contains(&second.shadow_id));
    assert!(remaining.contains(&third.shadow_id));
}

#[test]
fn crashed_run_cleanup_evicts_newest_beyond_keep() {
    let f = fixture();
    let first = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    let second = f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    let third = f.manager.create(&volume(), SnapshotSide::Source).unwrap();

    let deleted = f.manager.cleanup_crashed_run(&volume(), 1).unwrap();
    assert_eq!(deleted, 2);

    let remaining: Vec<String> = f
        .manager
        .list_ours(&volume())
        .unwrap()
        .into_iter()
        .map(|r| r.shadow_id)
        .collect();
    // The newest snapshots are the crashed run's leftovers.
    assert_eq!(remaining, vec![first.shadow_id.clone()]);
    assert!(!remaining.contains(&second.shadow_id));
    assert!(!remaining.contains(&third.shadow_id));
}

#[test]
fn retention_never_touches_external_snapshots() {
    let f = fixture();
    for _ in 0..3 {
        f.provider.add_snapshot(&volume());
    }
    f.manager.create(&volume(), SnapshotSide::Source).unwrap();

    let deleted = f.manager.retain_after_success(&volume(), 0).unwrap();
    assert_eq!(deleted, 1);
    // The three external snapshots are still there.
    assert_eq!(f.provider.snapshot_count(&volume()), 3);
}

#[test]
fn retention_under_keep_deletes_nothing() {
    let f = fixture();
    f.manager.create(&volume(), SnapshotSide::Source).unwrap();
    assert_eq!(f.manager.retain_after_success(&volume(), 3).unwrap(), 0);
    assert_eq!(f.manager.cleanup_crashed_run(&volume(), 3).unwrap(), 0);
}

#[test]
fn create_rolls_back_when_the_registry_write_fails() {
    let dir = tempfile::tempdir().unwrap();
    // Point the config store at a path whose parent is a regular file, so
    // every load/save fails.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();
    let config = Arc::new(ConfigStore::new(blocker.join("config.json")));

    let provider = Arc::new(TestSnapshotProvider::new());
    let manager = SnapshotManager::new(
        Arc::clone(&provider) as Arc<dyn SnapshotProvider>,
        config,
    );

    assert!(manager.create(&volume(), SnapshotSide::Source).is_err());
    // The OS snapshot was rolled back rather than left untracked.
    assert_eq!(provider.snapshot_count(&volume()), 0);
}

#[test]
fn volumes_are_isolated() {
    let f = fixture();
    let d = VolumeKey::local("D:");
    let e = VolumeKey::local("E:");
    f.manager.create(&d, SnapshotSide::Source).unwrap();
    f.manager.create(&e, SnapshotSide::Destination).unwrap();

    assert_eq!(f.manager.list_ours(&d).unwrap().len(), 1);
    assert_eq!(f.manager.list_ours(&e).unwrap().len(), 1);
    f.manager.retain_after_success(&d, 0).unwrap();
    assert_eq!(f.manager.list_ours(&e).unwrap().len(), 1);
}
