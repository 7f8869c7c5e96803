pub mod chunker;
pub mod paths;
pub mod profiler;

pub use chunker::build_chunks;
pub use profiler::{DirNode, TreeProfiler};
