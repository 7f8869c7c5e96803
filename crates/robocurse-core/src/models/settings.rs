use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::profile::Profile;

/// The authoritative on-disk configuration document.
///
/// Every optional key falls back to a default on read; unknown keys are
/// ignored. All writes go through atomic replace under the config lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub snapshot_limits: SnapshotLimits,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Owned snapshot registry: volume key → shadow ids, oldest first.
    #[serde(default)]
    pub snapshot_registry: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralSettings {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_log_root")]
    pub log_root: String,
    #[serde(default = "default_checkpoint_frequency")]
    pub checkpoint_frequency: u32,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_tick_millis")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_max_workers() -> usize {
    4
}
fn default_log_root() -> String {
    std::env::temp_dir()
        .join("robocurse-logs")
        .display()
        .to_string()
}
fn default_checkpoint_frequency() -> u32 {
    10
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_tick_millis() -> u64 {
    500
}
fn default_stop_grace() -> u64 {
    5
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            log_root: default_log_root(),
            checkpoint_frequency: default_checkpoint_frequency(),
            circuit_breaker_threshold: default_breaker_threshold(),
            tick_interval_ms: default_tick_millis(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    5
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_backoff_cap() -> u64 {
    120
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }
}

/// Hard caps on snapshots per volume, counting snapshots we do not own.
/// Exceeding a cap aborts creation; nothing is ever deleted to make room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SnapshotLimits {
    pub max_total_snapshots: Option<u32>,
    #[serde(default)]
    pub per_volume: BTreeMap<String, u32>,
}

impl SnapshotLimits {
    pub fn cap_for(&self, volume_key: &str) -> Option<u32> {
        self.per_volume
            .get(volume_key)
            .copied()
            .or(self.max_total_snapshots)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSettings {
    /// Defaults to a fixed file in the OS temp directory.
    pub path: Option<String>,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            path: None,
            interval_secs: default_health_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_true")]
    pub on_failure: bool,
    #[serde(default)]
    pub on_success: bool,
    #[serde(default = "default_error_digest")]
    pub max_errors_in_digest: usize,
}

fn default_true() -> bool {
    true
}
fn default_error_digest() -> usize {
    10
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            on_failure: true,
            on_success: false,
            max_errors_in_digest: default_error_digest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.general.max_workers, 4);
        assert_eq!(config.general.checkpoint_frequency, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_cap_secs, 120);
        assert!(config.profiles.is_empty());
        assert!(config.snapshot_registry.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config: AppConfig =
            serde_json::from_str(r#"{"general": {"max_workers": 8, "color_scheme": "dark"}}"#)
                .unwrap();
        assert_eq!(config.general.max_workers, 8);
    }

    #[test]
    fn per_volume_cap_overrides_global() {
        let mut limits = SnapshotLimits {
            max_total_snapshots: Some(10),
            per_volume: BTreeMap::new(),
        };
        limits.per_volume.insert("D:".to_string(), 4);
        assert_eq!(limits.cap_for("D:"), Some(4));
        assert_eq!(limits.cap_for("C:"), Some(10));
    }

    #[test]
    fn no_cap_configured_means_none() {
        let limits = SnapshotLimits::default();
        assert_eq!(limits.cap_for("C:"), None);
    }
}
