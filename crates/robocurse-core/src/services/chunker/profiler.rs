use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::copy_client::CopyClient;
use crate::error::AppError;
use crate::services::chunker::paths;
use crate::services::worker::progress::{parse_progress_line, ProgressEvent};

/// A directory with bottom-up subtree totals, children sorted by name.
#[derive(Debug, Clone, PartialEq)]
pub struct DirNode {
    pub path: String,
    pub name: String,
    /// Bytes and count of the files directly in this directory.
    pub file_bytes: u64,
    pub file_count: u64,
    pub total_bytes: u64,
    pub total_files: u64,
    pub total_dirs: u64,
    pub children: Vec<DirNode>,
}

impl DirNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files == 0 && self.children.is_empty()
    }
}

struct CachedProfile {
    tree: Arc<DirNode>,
    cached_at: DateTime<Utc>,
}

/// Enumerates source trees through the copy tool's list-only mode, so
/// permission and path semantics match the real copy, and caches profiles
/// in a small age-bounded LRU.
pub struct TreeProfiler {
    client: Arc<dyn CopyClient>,
    cache: Mutex<Vec<(String, CachedProfile)>>,
    cache_capacity: usize,
    cache_max_age: Duration,
}

const DEFAULT_CACHE_CAPACITY: usize = 8;
const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(15 * 60);

impl TreeProfiler {
    pub fn new(client: Arc<dyn CopyClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(Vec::new()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
        }
    }

    pub fn with_cache(mut self, capacity: usize, max_age: Duration) -> Self {
        self.cache_capacity = capacity;
        self.cache_max_age = max_age;
        self
    }

    /// Profile a subtree. `max_depth` bounds the *structure* of the returned
    /// tree: directories deeper than that collapse into their ancestor, with
    /// totals intact, so chunks cut at the floor still know their full size.
    pub fn profile_tree(&self, path: &str, max_depth: Option<u32>) -> Result<Arc<DirNode>, AppError> {
        let key = cache_key(path, max_depth);
        if let Some(tree) = self.cache_lookup(&key) {
            return Ok(tree);
        }

        let output = self.client.list(path, None).map_err(|e| {
            AppError::ChunkingError(format!("profiling {} failed: {}", path, e))
        })?;

        let tree = build_tree(path, &output.stdout, max_depth)?;
        let tree = Arc::new(tree);
        self.cache_insert(key, Arc::clone(&tree));
        Ok(tree)
    }

    pub fn invalidate(&self, path: &str) {
        let normalized = paths::normalize(path);
        self.cache
            .lock()
            .expect("lock poisoned")
            .retain(|(key, _)| !key.starts_with(&normalized));
    }

    fn cache_lookup(&self, key: &str) -> Option<Arc<DirNode>> {
        let mut cache = self.cache.lock().expect("lock poisoned");
        let position = cache.iter().position(|(k, _)| k == key)?;
        if age_of(&cache[position].1, Utc::now()) >= self.cache_max_age {
            cache.remove(position);
            return None;
        }
        // Move to front: most recently used.
        let entry = cache.remove(position);
        let tree = Arc::clone(&entry.1.tree);
        cache.insert(0, entry);
        Some(tree)
    }

    fn cache_insert(&self, key: String, tree: Arc<DirNode>) {
        let mut cache = self.cache.lock().expect("lock poisoned");
        cache.retain(|(k, _)| k != &key);
        cache.insert(
            0,
            (
                key,
                CachedProfile {
                    tree,
                    cached_at: Utc::now(),
                },
            ),
        );
        cache.truncate(self.cache_capacity);
    }
}

fn cache_key(path: &str, max_depth: Option<u32>) -> String {
    match max_depth {
        Some(depth) => format!("{}#{}", paths::normalize(path), depth),
        None => paths::normalize(path),
    }
}

fn age_of(profile: &CachedProfile, now: DateTime<Utc>) -> Duration {
    (now - profile.cached_at).to_std().unwrap_or(Duration::ZERO)
}

/// Assemble the annotated tree from list-only output.
///
/// File entries attach to their parent directory; directories deeper than
/// `max_depth` fold their contents into the ancestor at the depth floor.
fn build_tree(root: &str, listing: &str, max_depth: Option<u32>) -> Result<DirNode, AppError> {
    let root = paths::normalize(root);

    // Relative dir path → (file_bytes, file_count), root included as "".
    let mut dirs: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    dirs.insert(String::new(), (0, 0));

    for line in listing.lines() {
        match parse_progress_line(line) {
            Some(ProgressEvent::DirEnter { path, .. }) => {
                if let Some(rel) = paths::relative_to(&root, &path) {
                    dirs.entry(clamp_depth(&rel, max_depth)).or_insert((0, 0));
                }
            }
            Some(ProgressEvent::FileStart { path, size })
            | Some(ProgressEvent::FileUnchanged { path, size }) => {
                let rel_file = match paths::relative_to(&root, &path) {
                    Some(rel) => rel,
                    None => continue,
                };
                let rel_dir = paths::parent(&rel_file).unwrap_or_default();
                let rel_dir = clamp_depth(&rel_dir, max_depth);
                let entry = dirs.entry(rel_dir).or_insert((0, 0));
                entry.0 += size;
                entry.1 += 1;
            }
            _ => {}
        }
    }

    // Ensure every intermediate directory exists even if the listing only
    // named a deep child.
    let all_dirs: Vec<String> = dirs.keys().cloned().collect();
    for dir in all_dirs {
        let mut current = dir;
        while let Some(parent) = paths::parent(&current) {
            dirs.entry(parent.clone()).or_insert((0, 0));
            current = parent;
        }
    }

    Ok(assemble(&root, "", &dirs))
}

fn clamp_depth(rel_dir: &str, max_depth: Option<u32>) -> String {
    let Some(limit) = max_depth else {
        return rel_dir.to_string();
    };
    if rel_dir.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = rel_dir.split('\\').collect();
    if parts.len() as u32 <= limit {
        rel_dir.to_string()
    } else {
        parts[..limit as usize].join("\\")
    }
}

fn assemble(root: &str, rel: &str, dirs: &BTreeMap<String, (u64, u64)>) -> DirNode {
    let (file_bytes, file_count) = dirs.get(rel).copied().unwrap_or((0, 0));

    let child_rels: Vec<&String> = dirs
        .keys()
        .filter(|k| {
            !k.is_empty() && paths::parent(k).as_deref() == Some(rel)
        })
        .collect();

    let mut children: Vec<DirNode> = child_rels
        .into_iter()
        .map(|child_rel| assemble(root, child_rel, dirs))
        .collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));

    let total_bytes = file_bytes + children.iter().map(|c| c.total_bytes).sum::<u64>();
    let total_files = file_count + children.iter().map(|c| c.total_files).sum::<u64>();
    let total_dirs = children.len() as u64 + children.iter().map(|c| c.total_dirs).sum::<u64>();

    DirNode {
        path: paths::join(root, rel),
        name: paths::leaf(rel).to_string(),
        file_bytes,
        file_count,
        total_bytes,
        total_files,
        total_dirs,
        children,
    }
}
