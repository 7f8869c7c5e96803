use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::models::chunk::{Chunk, ChunkStatus};
use crate::services::worker::ActiveJob;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Preparing,
    Replicating,
    Paused,
    Stopping,
    Complete,
    Stopped,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedChunk {
    pub chunk: Chunk,
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub extras_seen: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedChunk {
    pub chunk: Chunk,
    pub exit_code: Option<i32>,
    pub error: String,
}

pub struct ActiveEntry {
    pub job: Box<dyn ActiveJob>,
    pub chunk: Chunk,
}

/// Shared orchestration state.
///
/// The tick loop is the sole mutator of the phase and the sole writer of
/// the active-jobs table; workers and observers read counters and
/// collections through their own synchronization. Counter snapshots may be
/// momentarily inconsistent across fields; there is no global lock.
pub struct RunState {
    phase: Mutex<RunPhase>,
    stop_requested: AtomicBool,
    pause_requested: AtomicBool,

    total_chunks: AtomicU64,
    total_bytes: AtomicU64,
    completed_count: AtomicU64,
    bytes_complete: AtomicU64,
    files_complete: AtomicU64,
    failed_count: AtomicU64,
    skipped_count: AtomicU64,

    pending: Mutex<VecDeque<Chunk>>,
    active: Mutex<HashMap<u32, ActiveEntry>>,
    completed: Mutex<Vec<CompletedChunk>>,
    failed: Mutex<Vec<FailedChunk>>,
    skipped: Mutex<Vec<Chunk>>,
    errors: Mutex<VecDeque<String>>,

    /// Source paths of every chunk completed this session, prior sessions
    /// included; this is what checkpoints persist.
    completed_paths: Mutex<Vec<String>>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(RunPhase::Idle),
            stop_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            total_chunks: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            completed_count: AtomicU64::new(0),
            bytes_complete: AtomicU64::new(0),
            files_complete: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            skipped_count: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            skipped: Mutex::new(Vec::new()),
            errors: Mutex::new(VecDeque::new()),
            completed_paths: Mutex::new(Vec::new()),
        }
    }

    /// Seed the pending queue for one profile run.
    pub fn seed(&self, chunks: Vec<Chunk>) {
        let mut pending = self.pending.lock().expect("lock poisoned");
        for chunk in chunks {
            self.total_chunks.fetch_add(1, Ordering::SeqCst);
            self.total_bytes
                .fetch_add(chunk.estimated_bytes, Ordering::SeqCst);
            pending.push_back(chunk);
        }
    }

    /// Reconstruct totals for chunks a previous session already completed.
    pub fn restore_completed(&self, paths: Vec<String>, bytes: u64) {
        let count = paths.len() as u64;
        self.total_chunks.fetch_add(count, Ordering::SeqCst);
        self.total_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.completed_count.fetch_add(count, Ordering::SeqCst);
        self.bytes_complete.fetch_add(bytes, Ordering::SeqCst);
        self.completed_paths
            .lock()
            .expect("lock poisoned")
            .extend(paths);
    }

    // --- phase ---

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().expect("lock poisoned")
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().expect("lock poisoned") = phase;
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    // --- queues ---

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }

    pub fn pop_pending(&self) -> Option<Chunk> {
        self.pending.lock().expect("lock poisoned").pop_front()
    }

    pub fn push_pending(&self, chunk: Chunk) {
        self.pending.lock().expect("lock poisoned").push_back(chunk);
    }

    pub fn active_len(&self) -> usize {
        self.active.lock().expect("lock poisoned").len()
    }

    pub fn insert_active(&self, pid: u32, entry: ActiveEntry) {
        self.active.lock().expect("lock poisoned").insert(pid, entry);
    }

    pub fn remove_active(&self, pid: u32) -> Option<ActiveEntry> {
        self.active.lock().expect("lock poisoned").remove(&pid)
    }

    pub fn active_pids(&self) -> Vec<u32> {
        self.active
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn with_active<R>(&self, f: impl FnOnce(&mut HashMap<u32, ActiveEntry>) -> R) -> R {
        f(&mut self.active.lock().expect("lock poisoned"))
    }

    // --- retirement ---

    pub fn record_completed(&self, mut chunk: Chunk, bytes: u64, files: u64, extras: bool) {
        chunk.status = ChunkStatus::Complete;
        self.completed_count.fetch_add(1, Ordering::SeqCst);
        self.bytes_complete.fetch_add(bytes, Ordering::SeqCst);
        self.files_complete.fetch_add(files, Ordering::SeqCst);
        self.completed_paths
            .lock()
            .expect("lock poisoned")
            .push(chunk.source.clone());
        self.completed.lock().expect("lock poisoned").push(CompletedChunk {
            chunk,
            bytes_copied: bytes,
            files_copied: files,
            extras_seen: extras,
        });
    }

    pub fn record_failed(&self, mut chunk: Chunk, exit_code: Option<i32>, error: String) {
        chunk.status = ChunkStatus::Failed;
        chunk.last_exit_code = exit_code;
        chunk.last_error = Some(error.clone());
        self.failed_count.fetch_add(1, Ordering::SeqCst);
        self.push_error(format!("{}: {}", chunk.source, error));
        self.failed.lock().expect("lock poisoned").push(FailedChunk {
            chunk,
            exit_code,
            error,
        });
    }

    pub fn record_skipped(&self, mut chunk: Chunk) {
        chunk.status = ChunkStatus::Skipped;
        self.skipped_count.fetch_add(1, Ordering::SeqCst);
        self.skipped.lock().expect("lock poisoned").push(chunk);
    }

    /// Pull a chunk out of the failed set for a manual retry. The failure
    /// counter is rolled back; the caller re-enqueues the chunk.
    pub fn take_failed(&self, chunk_id: u64) -> Option<FailedChunk> {
        let mut failed = self.failed.lock().expect("lock poisoned");
        let position = failed.iter().position(|f| f.chunk.id == chunk_id)?;
        self.failed_count.fetch_sub(1, Ordering::SeqCst);
        Some(failed.remove(position))
    }

    /// Pull a chunk out of the pending queue for a manual skip.
    pub fn take_pending(&self, chunk_id: u64) -> Option<Chunk> {
        let mut pending = self.pending.lock().expect("lock poisoned");
        let position = pending.iter().position(|c| c.id == chunk_id)?;
        pending.remove(position)
    }

    pub fn push_error(&self, message: String) {
        let mut errors = self.errors.lock().expect("lock poisoned");
        errors.push_back(message);
        // Bounded so a pathological run cannot grow without limit.
        while errors.len() > 1000 {
            errors.pop_front();
        }
    }

    // --- reads ---

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks.load(Ordering::SeqCst)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::SeqCst)
    }

    pub fn bytes_complete(&self) -> u64 {
        self.bytes_complete.load(Ordering::SeqCst)
    }

    pub fn files_complete(&self) -> u64 {
        self.files_complete.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::SeqCst)
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_count.load(Ordering::SeqCst)
    }

    pub fn completed_paths(&self) -> Vec<String> {
        self.completed_paths.lock().expect("lock poisoned").clone()
    }

    pub fn completed_chunks(&self) -> Vec<CompletedChunk> {
        self.completed.lock().expect("lock poisoned").clone()
    }

    pub fn failed_chunks(&self) -> Vec<FailedChunk> {
        self.failed.lock().expect("lock poisoned").clone()
    }

    pub fn skipped_chunks(&self) -> Vec<Chunk> {
        self.skipped.lock().expect("lock poisoned").clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn any_extras_seen(&self) -> bool {
        self.completed
            .lock()
            .expect("lock poisoned")
            .iter()
            .any(|c| c.extras_seen)
    }

    /// Chunk accounting invariant, true at every tick boundary.
    pub fn accounted(&self) -> bool {
        self.completed_count()
            + self.failed_count()
            + self.skipped_count()
            + self.pending_len() as u64
            + self.active_len() as u64
            == self.total_chunks()
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64, bytes: u64) -> Chunk {
        Chunk::new(
            id,
            format!("C:\\src\\{}", id),
            format!("D:\\dst\\{}", id),
            bytes,
            1,
            0,
            false,
        )
    }

    #[test]
    fn seed_sets_totals() {
        let state = RunState::new();
        state.seed(vec![chunk(1, 10), chunk(2, 20)]);
        assert_eq!(state.total_chunks(), 2);
        assert_eq!(state.total_bytes(), 30);
        assert_eq!(state.pending_len(), 2);
        assert!(state.accounted());
    }

    #[test]
    fn restore_completed_reconstructs_counters() {
        let state = RunState::new();
        state.restore_completed(vec!["C:\\a".into(), "C:\\b".into()], 300);
        assert_eq!(state.total_chunks(), 2);
        assert_eq!(state.completed_count(), 2);
        assert_eq!(state.bytes_complete(), 300);
        assert!(state.completed_paths().contains(&"C:\\a".to_string()));
        assert!(state.accounted());
    }

    #[test]
    fn retirement_keeps_the_accounting_invariant() {
        let state = RunState::new();
        state.seed(vec![chunk(1, 10), chunk(2, 20), chunk(3, 30)]);

        let first = state.pop_pending().unwrap();
        state.record_completed(first, 10, 1, false);
        assert!(state.accounted());

        let second = state.pop_pending().unwrap();
        state.record_failed(second, Some(16), "fatal".into());
        assert!(state.accounted());

        let third = state.pop_pending().unwrap();
        state.record_skipped(third);
        assert!(state.accounted());

        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.failed_count(), 1);
        assert_eq!(state.skipped_count(), 1);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn completed_chunk_is_marked_and_path_recorded() {
        let state = RunState::new();
        state.seed(vec![chunk(1, 10)]);
        let c = state.pop_pending().unwrap();
        state.record_completed(c, 10, 1, true);

        let completed = state.completed_chunks();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].chunk.status, ChunkStatus::Complete);
        assert!(completed[0].extras_seen);
        assert!(state.any_extras_seen());
        assert_eq!(state.completed_paths(), vec!["C:\\src\\1".to_string()]);
    }

    #[test]
    fn failed_chunk_records_exit_and_error() {
        let state = RunState::new();
        state.seed(vec![chunk(1, 10)]);
        let c = state.pop_pending().unwrap();
        state.record_failed(c, Some(8), "copy failures".into());

        let failed = state.failed_chunks();
        assert_eq!(failed[0].exit_code, Some(8));
        assert_eq!(failed[0].chunk.status, ChunkStatus::Failed);
        assert_eq!(state.errors().len(), 1);
    }

    #[test]
    fn error_queue_is_bounded() {
        let state = RunState::new();
        for i in 0..1500 {
            state.push_error(format!("error {}", i));
        }
        let errors = state.errors();
        assert_eq!(errors.len(), 1000);
        assert_eq!(errors[0], "error 500");
    }

    #[test]
    fn phase_transitions() {
        let state = RunState::new();
        assert_eq!(state.phase(), RunPhase::Idle);
        state.set_phase(RunPhase::Replicating);
        assert_eq!(state.phase(), RunPhase::Replicating);
        assert!(!RunPhase::Replicating.is_terminal());
        assert!(RunPhase::Complete.is_terminal());
        assert!(RunPhase::Stopped.is_terminal());
    }

    #[test]
    fn stop_and_pause_flags() {
        let state = RunState::new();
        assert!(!state.stop_requested());
        state.request_stop();
        assert!(state.stop_requested());

        state.request_pause();
        assert!(state.pause_requested());
        state.request_resume();
        assert!(!state.pause_requested());
    }
}
