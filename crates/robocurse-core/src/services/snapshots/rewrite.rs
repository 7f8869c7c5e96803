use crate::models::snapshot::SnapshotRecord;

/// Rewrites chunk paths from a live volume onto its snapshot view.
///
/// `C:\data\docs` becomes `<view>\data\docs`. Both directions are
/// idempotent, and `restore` inverts `rewrite` exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRewriter {
    volume_prefix: String,
    view_prefix: String,
}

impl PathRewriter {
    pub fn new(volume: &str, view_path: &str) -> Self {
        Self {
            volume_prefix: trim_prefix(volume),
            view_prefix: trim_prefix(view_path),
        }
    }

    pub fn for_record(record: &SnapshotRecord) -> Self {
        Self::new(&record.volume.volume, &record.view_path)
    }

    pub fn rewrite(&self, path: &str) -> String {
        if self.applies_to(path, &self.view_prefix) {
            return path.to_string();
        }
        match self.rest_after(path, &self.volume_prefix) {
            Some(rest) => format!("{}{}", self.view_prefix, rest),
            None => path.to_string(),
        }
    }

    pub fn restore(&self, path: &str) -> String {
        if self.applies_to(path, &self.volume_prefix) {
            return path.to_string();
        }
        match self.rest_after(path, &self.view_prefix) {
            Some(rest) => format!("{}{}", self.volume_prefix, rest),
            None => path.to_string(),
        }
    }

    fn applies_to(&self, path: &str, prefix: &str) -> bool {
        self.rest_after(path, prefix).is_some()
    }

    /// The remainder of `path` after `prefix`, when the prefix matches at a
    /// path-component boundary (case-insensitive).
    fn rest_after<'a>(&self, path: &'a str, prefix: &str) -> Option<&'a str> {
        if path.len() < prefix.len() {
            return None;
        }
        let (head, rest) = path.split_at(prefix.len());
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        if rest.is_empty() || rest.starts_with('\\') || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

fn trim_prefix(p: &str) -> String {
    p.trim_end_matches(['\\', '/']).to_string()
}
