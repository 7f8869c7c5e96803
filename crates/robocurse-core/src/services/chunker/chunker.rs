use crate::models::chunk::{Chunk, ChunkIdAllocator};
use crate::models::profile::{ChunkMode, ChunkingParams};
use crate::services::chunker::paths;
use crate::services::chunker::profiler::DirNode;

/// Partition a profiled tree into an ordered chunk queue.
///
/// Output is deterministic for identical inputs: children were sorted at
/// profile time and ids come from the allocator in emission order. Every
/// chunk's destination is the destination root plus the chunk's path
/// relative to the source root, spliced verbatim.
pub fn build_chunks(
    tree: &DirNode,
    source_root: &str,
    dest_root: &str,
    params: &ChunkingParams,
    ids: &ChunkIdAllocator,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    match params.mode {
        ChunkMode::Smart => {
            smart_chunks(tree, source_root, dest_root, "", 0, params, ids, &mut chunks)
        }
        ChunkMode::Flat => flat_chunks(tree, source_root, dest_root, params, ids, &mut chunks),
    }
    chunks
}

#[allow(clippy::too_many_arguments)]
fn smart_chunks(
    node: &DirNode,
    source_root: &str,
    dest_root: &str,
    rel: &str,
    depth: u32,
    params: &ChunkingParams,
    ids: &ChunkIdAllocator,
    out: &mut Vec<Chunk>,
) {
    let within_limits =
        node.total_bytes <= params.max_chunk_bytes && node.total_files <= params.max_chunk_files;

    if depth >= params.max_depth || within_limits {
        out.push(subtree_chunk(node, source_root, dest_root, rel, depth, ids));
        return;
    }

    // Split: loose files first, so each recursive chunk covers only
    // subdirectories.
    if node.file_count > 0 {
        out.push(files_only_chunk(node, source_root, dest_root, rel, depth, ids));
    }

    for child in &node.children {
        let child_rel = child_rel(rel, &child.name);
        smart_chunks(
            child,
            source_root,
            dest_root,
            &child_rel,
            depth + 1,
            params,
            ids,
            out,
        );
    }
}

fn flat_chunks(
    node: &DirNode,
    source_root: &str,
    dest_root: &str,
    _params: &ChunkingParams,
    ids: &ChunkIdAllocator,
    out: &mut Vec<Chunk>,
) {
    if node.file_count > 0 || node.children.is_empty() {
        out.push(files_only_chunk(node, source_root, dest_root, "", 0, ids));
    }
    for child in &node.children {
        out.push(subtree_chunk(
            child,
            source_root,
            dest_root,
            &child.name,
            1,
            ids,
        ));
    }
}

fn subtree_chunk(
    node: &DirNode,
    source_root: &str,
    dest_root: &str,
    rel: &str,
    depth: u32,
    ids: &ChunkIdAllocator,
) -> Chunk {
    if node.is_empty() {
        // An empty directory copies as a files-only chunk with zero work.
        return files_only_chunk(node, source_root, dest_root, rel, depth, ids);
    }
    Chunk::new(
        ids.allocate(),
        paths::join(source_root, rel),
        paths::join(dest_root, rel),
        node.total_bytes,
        node.total_files,
        depth,
        false,
    )
}

fn files_only_chunk(
    node: &DirNode,
    source_root: &str,
    dest_root: &str,
    rel: &str,
    depth: u32,
    ids: &ChunkIdAllocator,
) -> Chunk {
    Chunk::new(
        ids.allocate(),
        paths::join(source_root, rel),
        paths::join(dest_root, rel),
        node.file_bytes,
        node.file_count,
        depth,
        true,
    )
}

fn child_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{}\\{}", rel, name)
    }
}
