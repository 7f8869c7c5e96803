use std::process::Command;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::models::snapshot::VolumeKey;
use crate::snapshot_provider::{OsSnapshot, SnapshotError, SnapshotProvider};

static SHADOW_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Shadow Copy ID:\s*(\{[0-9a-f-]+\})").expect("invalid shadow id regex")
});

static VIEW_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Shadow Copy Volume(?: Name)?:\s*(\S+)").expect("invalid view path regex")
});

static CREATED_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)creation time:\s*(.+)$").expect("invalid creation time regex")
});

/// Drives the OS snapshot facility through its administrative command-line
/// tool. Remote volumes run the identical commands through the remote shell.
pub struct ProcessSnapshotProvider {
    admin_tool: String,
    remote_shell: String,
}

impl ProcessSnapshotProvider {
    pub fn new() -> Self {
        Self {
            admin_tool: "vssadmin".to_string(),
            remote_shell: "winrs".to_string(),
        }
    }

    pub fn with_tools(admin_tool: String, remote_shell: String) -> Self {
        Self {
            admin_tool,
            remote_shell,
        }
    }

    fn run(&self, volume: &VolumeKey, args: &[String]) -> Result<String, SnapshotError> {
        let output = match &volume.server {
            Some(server) => Command::new(&self.remote_shell)
                .arg(format!("-r:{}", server))
                .arg(&self.admin_tool)
                .args(args)
                .output()
                .map_err(|e| SnapshotError::RemoteError {
                    server: server.clone(),
                    message: e.to_string(),
                })?,
            None => Command::new(&self.admin_tool).args(args).output().map_err(|e| {
                SnapshotError::Unavailable(format!("{}: {}", self.admin_tool, e))
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(SnapshotError::Unavailable(detail));
        }
        Ok(stdout)
    }
}

impl Default for ProcessSnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for ProcessSnapshotProvider {
    fn create(&self, volume: &VolumeKey) -> Result<OsSnapshot, SnapshotError> {
        let args = vec![
            "create".to_string(),
            "shadow".to_string(),
            format!("/for={}", volume.volume),
        ];
        let stdout = self
            .run(volume, &args)
            .map_err(|e| SnapshotError::CreateFailed {
                volume: volume.to_string(),
                message: e.to_string(),
            })?;

        parse_create_output(&stdout).ok_or_else(|| SnapshotError::CreateFailed {
            volume: volume.to_string(),
            message: format!("unrecognized tool output: {}", stdout.trim()),
        })
    }

    fn delete(&self, volume: &VolumeKey, shadow_id: &str) -> Result<(), SnapshotError> {
        let args = vec![
            "delete".to_string(),
            "shadows".to_string(),
            format!("/shadow={}", shadow_id),
            "/quiet".to_string(),
        ];
        self.run(volume, &args)
            .map(|_| ())
            .map_err(|e| SnapshotError::DeleteFailed {
                shadow_id: shadow_id.to_string(),
                message: e.to_string(),
            })
    }

    fn list(&self, volume: &VolumeKey) -> Result<Vec<OsSnapshot>, SnapshotError> {
        let args = vec![
            "list".to_string(),
            "shadows".to_string(),
            format!("/for={}", volume.volume),
        ];
        match self.run(volume, &args) {
            Ok(stdout) => Ok(parse_list_output(&stdout)),
            // The tool reports "no items found" as a failure; that is an
            // empty volume, not an error.
            Err(SnapshotError::Unavailable(message))
                if message.to_ascii_lowercase().contains("no items") =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(SnapshotError::ListFailed {
                volume: volume.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Parse the output of a `create shadow` invocation into the new snapshot.
pub fn parse_create_output(stdout: &str) -> Option<OsSnapshot> {
    let shadow_id = SHADOW_ID_RE.captures(stdout)?.get(1)?.as_str().to_string();
    let view_path = VIEW_PATH_RE.captures(stdout)?.get(1)?.as_str().to_string();
    Some(OsSnapshot {
        shadow_id,
        created_at: Utc::now(),
        view_path,
    })
}

/// Parse `list shadows` output into snapshots, preserving listing order.
/// Timestamps the tool prints in an unrecognized locale fall back to an
/// index-ordered epoch so relative age is still meaningful.
pub fn parse_list_output(stdout: &str) -> Vec<OsSnapshot> {
    let mut snapshots = Vec::new();
    let mut pending_time: Option<DateTime<Utc>> = None;
    let mut current_id: Option<String> = None;

    for line in stdout.lines() {
        if let Some(caps) = CREATED_AT_RE.captures(line) {
            pending_time = parse_tool_timestamp(caps[1].trim());
        }
        if let Some(caps) = SHADOW_ID_RE.captures(line) {
            current_id = Some(caps[1].to_string());
        }
        if let Some(caps) = VIEW_PATH_RE.captures(line) {
            if let Some(shadow_id) = current_id.take() {
                let created_at = pending_time.unwrap_or_else(|| {
                    Utc.timestamp_opt(snapshots.len() as i64, 0)
                        .single()
                        .unwrap_or_else(Utc::now)
                });
                snapshots.push(OsSnapshot {
                    shadow_id,
                    created_at,
                    view_path: caps[1].to_string(),
                });
            }
        }
    }

    snapshots
}

fn parse_tool_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 3] = [
        "%m/%d/%Y %I:%M:%S %p",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}
