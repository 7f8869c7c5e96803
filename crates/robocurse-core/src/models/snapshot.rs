use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one volume, locally (`C:`) or on a remote host (`server|C:`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeKey {
    pub server: Option<String>,
    pub volume: String,
}

impl VolumeKey {
    pub fn local(volume: impl Into<String>) -> Self {
        Self {
            server: None,
            volume: normalize_volume(&volume.into()),
        }
    }

    pub fn remote(server: impl Into<String>, volume: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            volume: normalize_volume(&volume.into()),
        }
    }

    pub fn parse(key: &str) -> Self {
        match key.split_once('|') {
            Some((server, volume)) if !server.is_empty() => Self::remote(server, volume),
            _ => Self::local(key),
        }
    }

    /// The volume a path lives on: its drive prefix, e.g. `C:` from
    /// `C:\data\docs`, or `server|C:` from `\\server\C$\data`.
    pub fn of_path(path: &str) -> Option<Self> {
        let trimmed = path.trim();
        if let Some(rest) = trimmed
            .strip_prefix("\\\\")
            .or_else(|| trimmed.strip_prefix("//"))
        {
            let mut parts = rest.split(['\\', '/']).filter(|p| !p.is_empty());
            let server = parts.next()?;
            let share = parts.next()?;
            let volume = share.strip_suffix('$').unwrap_or(share);
            if volume.len() == 1 && volume.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some(Self::remote(server, format!("{}:", volume)));
            }
            return None;
        }
        let mut chars = trimmed.chars();
        let drive = chars.next()?;
        if drive.is_ascii_alphabetic() && chars.next() == Some(':') {
            return Some(Self::local(&trimmed[..2]));
        }
        None
    }

    pub fn is_remote(&self) -> bool {
        self.server.is_some()
    }
}

fn normalize_volume(volume: &str) -> String {
    let v = volume.trim().trim_end_matches(['\\', '/']);
    v.to_ascii_uppercase()
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.server {
            Some(server) => write!(f, "{}|{}", server, self.volume),
            None => write!(f, "{}", self.volume),
        }
    }
}

impl Serialize for VolumeKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VolumeKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(VolumeKey::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SnapshotSide {
    Source,
    Destination,
}

/// A persisted reference to an OS volume snapshot this system created.
///
/// Records land in the registry the moment the OS snapshot exists; a record
/// is removed only after the OS deletion succeeds. Snapshots present on a
/// volume but absent from the registry are external and are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRecord {
    pub volume: VolumeKey,
    pub shadow_id: String,
    pub created_at: DateTime<Utc>,
    pub side: SnapshotSide,
    /// OS-exposed read-only view of the volume at snapshot time.
    pub view_path: String,
}
