use std::path::Path;

use crate::copy_client::CopyClient;
use crate::file_system::FileSystem;
use crate::models::profile::Profile;
use crate::models::settings::SnapshotLimits;
use crate::models::snapshot::VolumeKey;
use crate::models::validation::{CheckSeverity, CheckType, PreflightResult, ValidationCheck};
use crate::services::snapshots::SnapshotManager;

/// Run pre-flight validation for one profile.
///
/// Checks: copy tool present, source readable, destination writable or
/// creatable, free space, and, when snapshots are requested, snapshot
/// privilege plus the per-volume hard cap. Remote paths that cannot be
/// verified locally pass as warnings.
pub fn run_preflight(
    profile: &Profile,
    fs: &dyn FileSystem,
    copy_client: &dyn CopyClient,
    snapshots: Option<&SnapshotManager>,
    limits: &SnapshotLimits,
) -> PreflightResult {
    let mut checks = Vec::new();

    checks.push(check_copy_tool(copy_client));
    checks.push(check_source_exists(&profile.source, fs));
    checks.push(check_destination_writable(&profile.destination, fs));
    checks.push(check_disk_space(&profile.source, &profile.destination, fs));

    if let (Some(manager), Some(policy)) = (snapshots, profile.snapshots.as_ref()) {
        if policy.any_side() {
            for (enabled, path) in [
                (policy.source_side, profile.source.as_str()),
                (policy.destination_side, profile.destination.as_str()),
            ] {
                if !enabled {
                    continue;
                }
                match VolumeKey::of_path(path) {
                    Some(volume) => {
                        checks.push(check_snapshot_privilege(manager, &volume));
                        checks.push(check_snapshot_hard_cap(manager, &volume, limits));
                    }
                    None => checks.push(ValidationCheck {
                        check_type: CheckType::SnapshotPrivilege,
                        passed: false,
                        message: format!(
                            "cannot determine the volume of {} for snapshotting",
                            path
                        ),
                        severity: CheckSeverity::Error,
                    }),
                }
            }
        }
    }

    let overall_pass = checks
        .iter()
        .all(|c| c.passed || c.severity == CheckSeverity::Warning);

    PreflightResult {
        profile: profile.name.clone(),
        checks,
        overall_pass,
    }
}

fn is_locally_verifiable(path: &str) -> bool {
    !path.starts_with("\\\\") && !path.starts_with("//")
}

fn check_copy_tool(copy_client: &dyn CopyClient) -> ValidationCheck {
    match copy_client.version() {
        Ok(version) => ValidationCheck {
            check_type: CheckType::CopyToolInstalled,
            passed: true,
            message: format!("copy tool present ({})", version.trim()),
            severity: CheckSeverity::Error,
        },
        Err(_) => ValidationCheck {
            check_type: CheckType::CopyToolInstalled,
            passed: false,
            message: "copy tool not installed or not found in PATH".to_string(),
            severity: CheckSeverity::Error,
        },
    }
}

fn check_source_exists(source: &str, fs: &dyn FileSystem) -> ValidationCheck {
    if !is_locally_verifiable(source) {
        return ValidationCheck {
            check_type: CheckType::SourceExists,
            passed: true,
            message: format!("remote source {} — cannot verify locally", source),
            severity: CheckSeverity::Warning,
        };
    }
    let exists = fs.is_dir(Path::new(source));
    ValidationCheck {
        check_type: CheckType::SourceExists,
        passed: exists,
        message: if exists {
            format!("source path exists: {}", source)
        } else {
            format!("source path missing or not a directory: {}", source)
        },
        severity: CheckSeverity::Error,
    }
}

fn check_destination_writable(dest: &str, fs: &dyn FileSystem) -> ValidationCheck {
    if !is_locally_verifiable(dest) {
        return ValidationCheck {
            check_type: CheckType::DestinationWritable,
            passed: true,
            message: format!("remote destination {} — cannot verify locally", dest),
            severity: CheckSeverity::Warning,
        };
    }

    let path = Path::new(dest);
    if fs.exists(path) && fs.is_dir(path) {
        return ValidationCheck {
            check_type: CheckType::DestinationWritable,
            passed: true,
            message: format!("destination directory exists: {}", dest),
            severity: CheckSeverity::Error,
        };
    }
    if fs.exists(path) {
        return ValidationCheck {
            check_type: CheckType::DestinationWritable,
            passed: false,
            message: format!("destination exists but is not a directory: {}", dest),
            severity: CheckSeverity::Error,
        };
    }
    let parent_ok = path
        .parent()
        .is_some_and(|parent| fs.exists(parent) && fs.is_dir(parent));
    ValidationCheck {
        check_type: CheckType::DestinationWritable,
        passed: parent_ok,
        message: if parent_ok {
            format!("destination will be created under an existing parent: {}", dest)
        } else {
            format!("destination and its parent directory do not exist: {}", dest)
        },
        severity: CheckSeverity::Error,
    }
}

fn check_disk_space(source: &str, dest: &str, fs: &dyn FileSystem) -> ValidationCheck {
    if !is_locally_verifiable(source) || !is_locally_verifiable(dest) {
        return ValidationCheck {
            check_type: CheckType::DiskSpace,
            passed: true,
            message: "disk space check skipped for remote locations".to_string(),
            severity: CheckSeverity::Warning,
        };
    }

    let needed = fs.dir_size(Path::new(source)).unwrap_or(0);
    let available = fs.available_space(Path::new(dest)).unwrap_or(u64::MAX);

    if needed == 0 {
        return ValidationCheck {
            check_type: CheckType::DiskSpace,
            passed: true,
            message: "source is empty or its size could not be determined".to_string(),
            severity: CheckSeverity::Warning,
        };
    }

    let enough = available >= needed;
    ValidationCheck {
        check_type: CheckType::DiskSpace,
        passed: enough,
        message: if enough {
            format!(
                "sufficient disk space ({} available, {} needed)",
                available, needed
            )
        } else {
            format!(
                "insufficient disk space ({} available, {} needed)",
                available, needed
            )
        },
        severity: CheckSeverity::Error,
    }
}

fn check_snapshot_privilege(manager: &SnapshotManager, volume: &VolumeKey) -> ValidationCheck {
    match manager.list_ours(volume) {
        Ok(_) => ValidationCheck {
            check_type: CheckType::SnapshotPrivilege,
            passed: true,
            message: format!("snapshot facility reachable on {}", volume),
            severity: CheckSeverity::Error,
        },
        Err(e) => ValidationCheck {
            check_type: CheckType::SnapshotPrivilege,
            passed: false,
            message: format!("snapshot facility unavailable on {}: {}", volume, e),
            severity: CheckSeverity::Error,
        },
    }
}

fn check_snapshot_hard_cap(
    manager: &SnapshotManager,
    volume: &VolumeKey,
    limits: &SnapshotLimits,
) -> ValidationCheck {
    match manager.enforce_hard_cap(volume, limits) {
        Ok(()) => ValidationCheck {
            check_type: CheckType::SnapshotHardCap,
            passed: true,
            message: format!("snapshot count on {} is under the hard cap", volume),
            severity: CheckSeverity::Error,
        },
        Err(e) => ValidationCheck {
            check_type: CheckType::SnapshotHardCap,
            passed: false,
            message: e.to_string(),
            severity: CheckSeverity::Error,
        },
    }
}
