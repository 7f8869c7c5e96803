/// String-level path handling for copy-tool paths.
///
/// Worker paths are opaque strings in whatever separator style the profile
/// uses; they are never round-tripped through the local platform's path
/// type, which would mangle drive letters and UNC prefixes on foreign hosts.

/// Trim trailing separators, keeping a bare drive root (`C:\`) intact.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    let without = trimmed.trim_end_matches(['\\', '/']);
    if without.len() == 2 && without.as_bytes()[1] == b':' {
        // Bare drive: keep the canonical `C:\` form.
        return format!("{}\\", without);
    }
    if without.is_empty() {
        return trimmed.to_string();
    }
    without.to_string()
}

fn separator_of(path: &str) -> char {
    if path.contains('\\') {
        '\\'
    } else {
        '/'
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split(['\\', '/']).filter(|s| !s.is_empty()).collect()
}

/// The path of `child` relative to `root`, empty string when equal.
/// Comparison is segment-wise and case-insensitive, matching the copy
/// tool's own path semantics. `None` when `child` is outside `root`.
pub fn relative_to(root: &str, child: &str) -> Option<String> {
    let root_normalized = normalize(root);
    let child_normalized = normalize(child);
    let root_segments = segments(&root_normalized);
    let child_segments = segments(&child_normalized);

    if child_segments.len() < root_segments.len() {
        return None;
    }
    for (r, c) in root_segments.iter().zip(child_segments.iter()) {
        if !r.eq_ignore_ascii_case(c) {
            return None;
        }
    }

    Some(child_segments[root_segments.len()..].join("\\"))
}

/// Join a relative path onto a root, in the root's separator style. The
/// relative part is spliced verbatim; the root is never repeated.
pub fn join(root: &str, rel: &str) -> String {
    let root = normalize(root);
    if rel.is_empty() {
        return root;
    }
    let sep = separator_of(&root);
    let rel_joined = segments(rel).join(&sep.to_string());
    if root.ends_with(sep) {
        format!("{}{}", root, rel_joined)
    } else {
        format!("{}{}{}", root, sep, rel_joined)
    }
}

/// Parent of a relative path, `None` at the root.
pub fn parent(rel: &str) -> Option<String> {
    let parts = segments(rel);
    if parts.is_empty() {
        return None;
    }
    Some(parts[..parts.len() - 1].join("\\"))
}

/// Last segment of a path.
pub fn leaf(path: &str) -> &str {
    segments(path).last().copied().unwrap_or("")
}
