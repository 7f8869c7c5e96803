pub mod backoff;
pub mod circuit_breaker;
pub mod run_state;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::models::chunk::ChunkStatus;
use crate::models::progress::RunProgress;
use crate::models::settings::{GeneralSettings, RetrySettings};
use crate::models::summary::EndReason;
use crate::services::health::{HealthPublisher, HealthStatus};
use crate::services::process_registry::ProcessRegistry;
use crate::services::progress_aggregator::ProgressAggregator;
use crate::services::worker::exit_code::Severity;
use crate::services::worker::{chunk_log_path, JobLauncher};
use backoff::RetryPolicy;
use circuit_breaker::CircuitBreaker;
use run_state::{ActiveEntry, RunPhase, RunState};

/// Receives checkpoint saves the tick loop decides are due. The run driver
/// supplies a sink that projects state into the persisted record.
pub trait CheckpointSink: Send + Sync {
    fn persist(&self, state: &RunState);
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub tick_interval: Duration,
    /// Checkpoint after this many completions; failures checkpoint at once.
    pub checkpoint_every: u32,
    pub stop_grace: Duration,
    /// Bound on the post-exit wait for log parsing and classification.
    pub wait_timeout: Duration,
    pub breaker_threshold: u32,
    pub retry: RetryPolicy,
    pub log_root: PathBuf,
}

impl OrchestratorConfig {
    pub fn from_settings(general: &GeneralSettings, retry: &RetrySettings) -> Self {
        Self {
            max_concurrent: general.max_workers.max(1),
            tick_interval: Duration::from_millis(general.tick_interval_ms),
            checkpoint_every: general.checkpoint_frequency.max(1),
            stop_grace: Duration::from_secs(general.stop_grace_secs),
            wait_timeout: Duration::from_secs(30),
            breaker_threshold: general.circuit_breaker_threshold.max(1),
            retry: RetryPolicy::from(retry),
            log_root: PathBuf::from(&general.log_root),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&GeneralSettings::default(), &RetrySettings::default())
    }
}

/// The concurrent heart: a single tick loop drives chunks from Pending to
/// terminal states across a bounded pool of worker processes.
///
/// The tick loop owns every phase transition. Workers publish progress and
/// exits through their own handles; observers request stop/pause/resume via
/// flags the next tick applies.
pub struct Orchestrator {
    state: Arc<RunState>,
    launcher: Arc<dyn JobLauncher>,
    registry: Arc<ProcessRegistry>,
    config: OrchestratorConfig,
    profile_name: String,
    breaker: Mutex<CircuitBreaker>,
    aggregator: Mutex<ProgressAggregator>,
    latest_progress: Mutex<Option<RunProgress>>,
    checkpoint_sink: Option<Arc<dyn CheckpointSink>>,
    health: Option<Arc<HealthPublisher>>,
    completed_since_save: AtomicU32,
    end_reason: Mutex<Option<EndReason>>,
}

impl Orchestrator {
    pub fn new(
        state: Arc<RunState>,
        launcher: Arc<dyn JobLauncher>,
        registry: Arc<ProcessRegistry>,
        config: OrchestratorConfig,
        profile_name: impl Into<String>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker_threshold);
        let aggregator = ProgressAggregator::new(state.total_bytes());
        Self {
            state,
            launcher,
            registry,
            config,
            profile_name: profile_name.into(),
            breaker: Mutex::new(breaker),
            aggregator: Mutex::new(aggregator),
            latest_progress: Mutex::new(None),
            checkpoint_sink: None,
            health: None,
            completed_since_save: AtomicU32::new(0),
            end_reason: Mutex::new(None),
        }
    }

    pub fn with_checkpoint_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint_sink = Some(sink);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthPublisher>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    pub fn progress(&self) -> Option<RunProgress> {
        self.latest_progress.lock().expect("lock poisoned").clone()
    }

    /// Drive the tick loop until a terminal phase. Blocking; the caller owns
    /// the thread.
    pub fn run(&self) -> EndReason {
        self.aggregator
            .lock()
            .expect("lock poisoned")
            .set_total_bytes(self.state.total_bytes());
        self.state.set_phase(RunPhase::Replicating);

        loop {
            // A panic inside one tick is logged and the loop stays alive;
            // only poisoned state would end the run early.
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.tick())) {
                let detail = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "non-string panic".to_string());
                log::error!("tick panicked: {}", detail);
                self.state.push_error(format!("internal error: {}", detail));
            }

            if self.state.phase().is_terminal() {
                break;
            }
            std::thread::sleep(self.config.tick_interval);
        }

        self.save_checkpoint();
        self.publish_health(true);
        self.end_reason()
    }

    pub fn request_stop(&self) {
        self.set_end_reason(EndReason::StoppedByUser);
        self.state.request_stop();
    }

    pub fn request_pause(&self) {
        self.state.request_pause();
    }

    pub fn request_resume(&self) {
        self.state.request_resume();
    }

    /// Manual hook: re-enqueue a failed chunk with a fresh retry budget.
    pub fn retry_chunk(&self, chunk_id: u64) -> bool {
        match self.state.take_failed(chunk_id) {
            Some(mut failed) => {
                failed.chunk.status = ChunkStatus::Pending;
                failed.chunk.retry_count = 0;
                failed.chunk.retry_after = None;
                self.state.push_pending(failed.chunk);
                true
            }
            None => false,
        }
    }

    /// Manual hook: mark a pending chunk skipped. Skips never feed the
    /// circuit breaker.
    pub fn skip_chunk(&self, chunk_id: u64) -> bool {
        match self.state.take_pending(chunk_id) {
            Some(chunk) => {
                self.state.record_skipped(chunk);
                true
            }
            None => false,
        }
    }

    fn tick(&self) {
        self.apply_requested_transitions();

        match self.state.phase() {
            RunPhase::Stopping => {
                self.drain_stopping();
            }
            RunPhase::Paused => {
                // No admission while paused; running jobs continue to
                // completion and keep reporting progress.
                self.poll_progress();
                let failure = self.retire_finished();
                self.maybe_checkpoint(failure);
                self.publish_health(false);
            }
            RunPhase::Replicating => {
                self.admit();
                self.poll_progress();
                let failure = self.retire_finished();
                self.check_breaker();
                self.maybe_checkpoint(failure);
                self.publish_health(false);
                if self.state.phase() == RunPhase::Replicating
                    && self.state.pending_len() == 0
                    && self.state.active_len() == 0
                {
                    self.set_end_reason(EndReason::Complete);
                    self.state.set_phase(RunPhase::Complete);
                }
            }
            _ => {}
        }
    }

    fn apply_requested_transitions(&self) {
        let phase = self.state.phase();
        if self.state.stop_requested() && !phase.is_terminal() && phase != RunPhase::Stopping {
            self.set_end_reason(EndReason::StoppedByUser);
            self.state.set_phase(RunPhase::Stopping);
            return;
        }
        if self.state.pause_requested() && phase == RunPhase::Replicating {
            log::info!("run paused");
            self.state.set_phase(RunPhase::Paused);
        } else if !self.state.pause_requested() && phase == RunPhase::Paused {
            log::info!("run resumed");
            self.state.set_phase(RunPhase::Replicating);
        }
    }

    /// Admit pending chunks up to the concurrency limit. Admission is FIFO
    /// modulo backoff deadlines: a deferred chunk rotates to the tail and is
    /// rechecked on later ticks.
    fn admit(&self) {
        let now = Utc::now();
        let mut pops = 0;
        let bound = self.state.pending_len();

        while self.state.active_len() < self.config.max_concurrent && pops < bound {
            let Some(mut chunk) = self.state.pop_pending() else {
                break;
            };
            pops += 1;

            if !chunk.is_ready(now) {
                self.state.push_pending(chunk);
                continue;
            }

            chunk.status = ChunkStatus::Running;
            chunk.retry_after = None;
            let log_path = chunk_log_path(&self.config.log_root, now, chunk.id);

            match self.launcher.launch(&mut chunk, &log_path) {
                Ok(job) => {
                    let pid = job.pid();
                    log::debug!("admitted chunk {} as pid {}", chunk.id, pid);
                    self.state.insert_active(pid, ActiveEntry { job, chunk });
                }
                Err(e) => {
                    // Launch failures route through the same retry path as
                    // transient worker failures.
                    log::warn!("chunk {} failed to launch: {}", chunk.id, e);
                    self.route_retry_or_fail(chunk, None, e.to_string(), true);
                }
            }
        }
    }

    fn poll_progress(&self) {
        let (inflight_bytes, inflight_files) = self.state.with_active(|active| {
            active.values().fold((0u64, 0u64), |acc, entry| {
                let p = entry.job.progress();
                (acc.0 + p.bytes_copied, acc.1 + p.files_copied)
            })
        });
        let progress = self.aggregator.lock().expect("lock poisoned").record(
            inflight_bytes,
            inflight_files,
            Utc::now(),
        );
        *self.latest_progress.lock().expect("lock poisoned") = Some(progress);
    }

    /// Retire every active job whose process has exited. Returns whether any
    /// chunk reached the failed set this tick.
    fn retire_finished(&self) -> bool {
        let exited: Vec<u32> = self.state.with_active(|active| {
            let mut exited = Vec::new();
            for (pid, entry) in active.iter_mut() {
                if entry.job.has_exited() {
                    exited.push(*pid);
                }
            }
            exited
        });

        let mut any_failure = false;
        for pid in exited {
            let Some(mut entry) = self.state.remove_active(pid) else {
                continue;
            };
            let extras_streamed = entry.job.extras_seen();

            match entry.job.wait(self.config.wait_timeout) {
                Ok(info) => {
                    entry.chunk.last_exit_code = Some(info.exit_code);
                    match info.classification.severity {
                        Severity::Success | Severity::Warning => {
                            let (bytes, files) = match &info.tally {
                                Some(tally) => (tally.bytes.copied, tally.files.copied),
                                None => {
                                    (entry.chunk.estimated_bytes, entry.chunk.estimated_files)
                                }
                            };
                            let extras = extras_streamed
                                || info
                                    .tally
                                    .as_ref()
                                    .is_some_and(|t| t.files.extras > 0 || t.dirs.extras > 0);
                            if info.classification.severity == Severity::Warning {
                                log::warn!(
                                    "chunk {} completed with warnings: {}",
                                    entry.chunk.id,
                                    info.classification.message
                                );
                                self.state.push_error(format!(
                                    "{}: {}",
                                    entry.chunk.source, info.classification.message
                                ));
                            }
                            self.state.record_completed(entry.chunk, bytes, files, extras);
                            self.aggregator
                                .lock()
                                .expect("lock poisoned")
                                .add_retired(bytes, files);
                            self.breaker.lock().expect("lock poisoned").record_success();
                            self.completed_since_save.fetch_add(1, Ordering::SeqCst);
                        }
                        Severity::Error if info.classification.should_retry => {
                            any_failure |= !self.route_retry_or_fail(
                                entry.chunk,
                                Some(info.exit_code),
                                info.classification.message,
                                true,
                            );
                        }
                        _ => {
                            self.record_failure(
                                entry.chunk,
                                Some(info.exit_code),
                                info.classification.message,
                            );
                            any_failure = true;
                        }
                    }
                }
                Err(e) => {
                    self.record_failure(entry.chunk, None, e.to_string());
                    any_failure = true;
                }
            }
        }
        any_failure
    }

    /// Apply the retry decision to a retryably-failed chunk. Returns true
    /// when the chunk was re-enqueued, false when its budget is spent and it
    /// was failed instead.
    fn route_retry_or_fail(
        &self,
        mut chunk: crate::models::chunk::Chunk,
        exit_code: Option<i32>,
        error: String,
        retryable: bool,
    ) -> bool {
        if retryable && self.config.retry.allows_retry(chunk.retry_count) {
            chunk.retry_count += 1;
            let delay = self.config.retry.backoff(chunk.retry_count);
            chunk.retry_after = Some(
                Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
            );
            chunk.status = ChunkStatus::Pending;
            chunk.last_exit_code = exit_code;
            chunk.last_error = Some(error.clone());
            log::warn!(
                "chunk {} failed transiently (attempt {}), retrying in {:?}: {}",
                chunk.id,
                chunk.retry_count,
                delay,
                error
            );
            self.state.push_pending(chunk);
            true
        } else {
            self.record_failure(chunk, exit_code, error);
            false
        }
    }

    fn record_failure(
        &self,
        chunk: crate::models::chunk::Chunk,
        exit_code: Option<i32>,
        error: String,
    ) {
        log::error!("chunk {} failed: {}", chunk.id, error);
        let detail = format!("{} ({})", chunk.source, error);
        self.state.record_failed(chunk, exit_code, error);
        self.breaker
            .lock()
            .expect("lock poisoned")
            .record_failure(&detail);
    }

    fn check_breaker(&self) {
        let breaker = self.breaker.lock().expect("lock poisoned");
        if breaker.is_tripped() && self.state.phase() == RunPhase::Replicating {
            log::error!(
                "circuit breaker tripped: {}",
                breaker.reason().unwrap_or("unknown")
            );
            drop(breaker);
            self.set_end_reason(EndReason::CircuitBreaker);
            self.state.set_phase(RunPhase::Stopping);
        }
    }

    fn drain_stopping(&self) {
        self.registry.terminate_all(self.config.stop_grace);

        for pid in self.state.active_pids() {
            if let Some(mut entry) = self.state.remove_active(pid) {
                entry.job.stop(Duration::ZERO);
                // Neither completed nor failed: the chunk returns to the
                // queue so a resumed run picks it up again.
                entry.chunk.status = ChunkStatus::Pending;
                self.state.push_pending(entry.chunk);
            }
        }

        log::info!("run stopped ({:?})", self.end_reason());
        self.state.set_phase(RunPhase::Stopped);
    }

    fn maybe_checkpoint(&self, failure_this_tick: bool) {
        let Some(sink) = &self.checkpoint_sink else {
            return;
        };
        let due = failure_this_tick
            || self.completed_since_save.load(Ordering::SeqCst) >= self.config.checkpoint_every;
        if due {
            sink.persist(&self.state);
            self.completed_since_save.store(0, Ordering::SeqCst);
        }
    }

    fn save_checkpoint(&self) {
        if let Some(sink) = &self.checkpoint_sink {
            sink.persist(&self.state);
            self.completed_since_save.store(0, Ordering::SeqCst);
        }
    }

    fn publish_health(&self, force: bool) {
        let Some(health) = &self.health else {
            return;
        };
        let status = HealthStatus {
            phase: format!("{:?}", self.state.phase()),
            profile: self.profile_name.clone(),
            total_chunks: self.state.total_chunks(),
            completed_count: self.state.completed_count(),
            failed_count: self.state.failed_count(),
            bytes_complete: self.state.bytes_complete(),
            total_bytes: self.state.total_bytes(),
            timestamp: Utc::now(),
            stop_requested: self.state.stop_requested(),
        };
        if force {
            health.publish_now(&status);
        } else {
            health.publish_if_due(&status);
        }
    }

    fn set_end_reason(&self, reason: EndReason) {
        let mut current = self.end_reason.lock().expect("lock poisoned");
        if current.is_none() {
            *current = Some(reason);
        }
    }

    fn end_reason(&self) -> EndReason {
        self.end_reason
            .lock()
            .expect("lock poisoned")
            .unwrap_or(EndReason::Complete)
    }

    pub fn breaker_reason(&self) -> Option<String> {
        self.breaker
            .lock()
            .expect("lock poisoned")
            .reason()
            .map(|s| s.to_string())
    }
}
