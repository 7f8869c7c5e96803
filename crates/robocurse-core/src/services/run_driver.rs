use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::copy_client::CopyClient;
use crate::error::AppError;
use crate::file_system::FileSystem;
use crate::models::checkpoint::{Checkpoint, CHECKPOINT_VERSION};
use crate::models::chunk::{Chunk, ChunkIdAllocator};
use crate::models::profile::Profile;
use crate::models::settings::AppConfig;
use crate::models::snapshot::{SnapshotRecord, SnapshotSide, VolumeKey};
use crate::models::summary::{
    EndReason, FailedChunkDigest, ProfileOutcome, ProfileReport, RunSummary,
};
use crate::models::validation::CheckType;
use crate::services::checkpoint::CheckpointStore;
use crate::services::chunker::{build_chunks, TreeProfiler};
use crate::services::health::HealthPublisher;
use crate::services::notification::{LogNotificationHook, NotificationHook};
use crate::services::orchestrator::run_state::RunState;
use crate::services::orchestrator::{CheckpointSink, Orchestrator, OrchestratorConfig};
use crate::services::preflight::run_preflight;
use crate::services::process_registry::ProcessRegistry;
use crate::services::snapshots::{PathRewriter, SnapshotManager};
use crate::services::worker::worker::CopyWorker;
use crate::services::worker::JobLauncher;

/// Produces the per-profile launcher. The production factory builds a copy
/// worker wrapper around the profile's options; tests substitute scripted
/// launchers.
pub trait LauncherFactory: Send + Sync {
    fn launcher_for(&self, profile: &Profile) -> Arc<dyn JobLauncher>;
}

pub struct WorkerLauncherFactory {
    client: Arc<dyn CopyClient>,
    registry: Arc<ProcessRegistry>,
}

impl WorkerLauncherFactory {
    pub fn new(client: Arc<dyn CopyClient>, registry: Arc<ProcessRegistry>) -> Self {
        Self { client, registry }
    }
}

impl LauncherFactory for WorkerLauncherFactory {
    fn launcher_for(&self, profile: &Profile) -> Arc<dyn JobLauncher> {
        Arc::new(CopyWorker::new(
            Arc::clone(&self.client),
            Arc::clone(&self.registry),
            profile.options.clone(),
        ))
    }
}

/// Final result of a run, with the process exit code mapping.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    preflight_aborts: bool,
}

impl RunReport {
    /// 0 success, 1 generic failure, 2 config/pre-flight failure,
    /// 3 snapshot hard-cap failure (manual intervention required).
    pub fn exit_code(&self) -> i32 {
        match self.summary.end_reason {
            EndReason::SnapshotCapExceeded => 3,
            EndReason::PreflightFailed => 2,
            _ if self.preflight_aborts => 2,
            EndReason::StoppedByUser | EndReason::CircuitBreaker => 1,
            EndReason::Complete => {
                if self.summary.failed > 0
                    || self
                        .summary
                        .profiles
                        .iter()
                        .any(|p| matches!(p.outcome, ProfileOutcome::Failed | ProfileOutcome::Aborted))
                {
                    1
                } else {
                    0
                }
            }
        }
    }
}

enum ProfileEnd {
    Ran(EndReason),
    AbortedPreflight,
    AbortedSnapshotCap,
    AbortedError,
}

/// Drives a whole run: profile iteration, pre-flight, snapshot acquisition
/// and release, chunking, checkpoint gating, orchestration, and the final
/// classified summary.
pub struct RunDriver {
    config: AppConfig,
    fs: Arc<dyn FileSystem>,
    copy_client: Arc<dyn CopyClient>,
    launchers: Arc<dyn LauncherFactory>,
    checkpoints: Arc<CheckpointStore>,
    registry: Arc<ProcessRegistry>,
    profiler: Arc<TreeProfiler>,
    snapshots: Option<Arc<SnapshotManager>>,
    health: Option<Arc<HealthPublisher>>,
    hook: Arc<dyn NotificationHook>,
    current: Mutex<Option<Arc<Orchestrator>>>,
    stop_requested: AtomicBool,
}

impl RunDriver {
    pub fn new(
        config: AppConfig,
        fs: Arc<dyn FileSystem>,
        copy_client: Arc<dyn CopyClient>,
        launchers: Arc<dyn LauncherFactory>,
        checkpoints: Arc<CheckpointStore>,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        let profiler = Arc::new(TreeProfiler::new(Arc::clone(&copy_client)));
        let health = Arc::new(HealthPublisher::new(
            config
                .health
                .path
                .clone()
                .map(std::path::PathBuf::from)
                .unwrap_or_else(HealthPublisher::default_path),
            std::time::Duration::from_secs(config.health.interval_secs),
        ));
        Self {
            config,
            fs,
            copy_client,
            launchers,
            checkpoints,
            registry,
            profiler,
            snapshots: None,
            health: Some(health),
            hook: Arc::new(LogNotificationHook),
            current: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthPublisher>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_notification(mut self, hook: Arc<dyn NotificationHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(orchestrator) = self.current.lock().expect("lock poisoned").as_ref() {
            orchestrator.request_stop();
        }
    }

    pub fn request_pause(&self) {
        if let Some(orchestrator) = self.current.lock().expect("lock poisoned").as_ref() {
            orchestrator.request_pause();
        }
    }

    pub fn request_resume(&self) {
        if let Some(orchestrator) = self.current.lock().expect("lock poisoned").as_ref() {
            orchestrator.request_resume();
        }
    }

    /// Run every configured profile. Blocking; returns the classified
    /// summary with the exit-code mapping.
    pub fn start_run(&self) -> RunReport {
        let profiles = self.config.profiles.clone();
        self.start_run_with(&profiles)
    }

    pub fn start_run_with(&self, profiles: &[Profile]) -> RunReport {
        let checkpoint = self.checkpoints.load();
        let (session_id, run_started_at, start_index) = match &checkpoint {
            Some(cp) => {
                log::info!(
                    "resuming session {} at profile {} ({} chunks already complete)",
                    cp.session_id,
                    cp.profile_index,
                    cp.completed_paths.len()
                );
                (cp.session_id, cp.run_started_at, cp.profile_index)
            }
            None => (Uuid::new_v4(), Utc::now(), 0),
        };

        if let Some(cp) = &checkpoint {
            self.cleanup_after_crash(cp, profiles);
        }

        let mut reports: Vec<ProfileReport> = Vec::new();
        let mut end_reason = EndReason::Complete;
        let mut preflight_aborts = false;
        let mut errors: Vec<String> = Vec::new();

        for (index, profile) in profiles.iter().enumerate() {
            if index < start_index {
                log::info!(
                    "profile '{}' completed in a previous session, skipping",
                    profile.name
                );
                continue;
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                end_reason = EndReason::StoppedByUser;
                break;
            }

            let resume_for_profile = checkpoint
                .as_ref()
                .filter(|cp| cp.profile_index == index)
                .cloned();

            let (report, end) = self.run_profile(
                index,
                profile,
                session_id,
                run_started_at,
                resume_for_profile.as_ref(),
                &mut errors,
            );
            reports.push(report);

            match end {
                ProfileEnd::Ran(EndReason::Complete) => {}
                ProfileEnd::Ran(reason) => {
                    end_reason = reason;
                    break;
                }
                ProfileEnd::AbortedSnapshotCap => {
                    // Hard cap requires manual intervention; the run aborts.
                    end_reason = EndReason::SnapshotCapExceeded;
                    break;
                }
                ProfileEnd::AbortedPreflight => {
                    // Pre-flight aborts the profile, never the run.
                    preflight_aborts = true;
                }
                ProfileEnd::AbortedError => {}
            }
        }

        let finished_at = Utc::now();
        let max_errors = self.config.notifications.max_errors_in_digest;
        errors.truncate(max_errors);

        let summary = RunSummary {
            session_id,
            started_at: run_started_at,
            finished_at,
            end_reason,
            total_chunks: reports.iter().map(|r| r.total_chunks).sum(),
            completed: reports.iter().map(|r| r.completed).sum(),
            failed: reports.iter().map(|r| r.failed).sum(),
            skipped: reports.iter().map(|r| r.skipped).sum(),
            bytes_copied: reports.iter().map(|r| r.bytes_copied).sum(),
            profiles: reports,
            errors,
        };

        if summary.end_reason == EndReason::Complete && summary.failed == 0 {
            self.checkpoints.clear();
        }

        self.hook.on_run_complete(&summary);

        RunReport {
            summary,
            preflight_aborts,
        }
    }

    fn run_profile(
        &self,
        index: usize,
        profile: &Profile,
        session_id: Uuid,
        run_started_at: DateTime<Utc>,
        checkpoint: Option<&Checkpoint>,
        errors: &mut Vec<String>,
    ) -> (ProfileReport, ProfileEnd) {
        log::info!("starting profile '{}'", profile.name);

        // 1. Pre-flight.
        let preflight = run_preflight(
            profile,
            self.fs.as_ref(),
            self.copy_client.as_ref(),
            self.snapshots.as_deref(),
            &self.config.snapshot_limits,
        );
        if !preflight.overall_pass {
            let message = preflight.failure_summary();
            errors.push(format!("{}: {}", profile.name, message));
            let cap_exceeded = preflight.failed_check(CheckType::SnapshotHardCap).is_some();
            log::error!("profile '{}' failed pre-flight: {}", profile.name, message);
            return (
                aborted_report(profile, message),
                if cap_exceeded {
                    ProfileEnd::AbortedSnapshotCap
                } else {
                    ProfileEnd::AbortedPreflight
                },
            );
        }

        // Surface destination permission problems before snapshots and
        // workers get involved; the copy tool would create it anyway.
        if !profile.destination.starts_with("\\\\") && !profile.destination.starts_with("//") {
            if let Err(e) = self
                .fs
                .create_dir_all(std::path::Path::new(&profile.destination))
            {
                let message = format!("cannot create destination: {}", AppError::from(e));
                errors.push(format!("{}: {}", profile.name, message));
                return (aborted_report(profile, message), ProfileEnd::AbortedError);
            }
        }

        // 2. Snapshot acquisition and path rewriting.
        let acquisition = match self.acquire_snapshots(profile) {
            Ok(acquisition) => acquisition,
            Err(e) => {
                let message = format!("snapshot acquisition failed: {}", e);
                errors.push(format!("{}: {}", profile.name, message));
                return (aborted_report(profile, message), ProfileEnd::AbortedError);
            }
        };

        // 3. Chunking against the effective (possibly snapshot-view) roots.
        let chunks = match self.chunk_profile(profile, &acquisition) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.release_snapshots(profile, &acquisition.records);
                let message = format!("chunking failed: {}", e);
                errors.push(format!("{}: {}", profile.name, message));
                return (aborted_report(profile, message), ProfileEnd::AbortedError);
            }
        };

        // 4. Checkpoint gating: completed chunks never relaunch.
        let (done, remaining): (Vec<Chunk>, Vec<Chunk>) = chunks.into_iter().partition(|c| {
            checkpoint.is_some_and(|cp| cp.is_completed(&acquisition.restore(&c.source)))
        });

        let state = Arc::new(RunState::new());
        if !done.is_empty() {
            let bytes: u64 = done.iter().map(|c| c.estimated_bytes).sum();
            let paths: Vec<String> = done
                .iter()
                .map(|c| acquisition.restore(&c.source))
                .collect();
            log::info!(
                "resume: {} chunks already complete ({} bytes), {} remaining",
                paths.len(),
                bytes,
                remaining.len()
            );
            state.restore_completed(paths, bytes);
        }
        state.seed(remaining);

        // 5. Orchestration.
        let orch_config =
            OrchestratorConfig::from_settings(&self.config.general, &self.config.retry);

        let sink: Arc<dyn CheckpointSink> = Arc::new(DriverCheckpointSink {
            store: Arc::clone(&self.checkpoints),
            session_id,
            run_started_at,
            profile_index: index,
            profile_name: profile.name.clone(),
            rewriters: acquisition.rewriters.clone(),
            session_snapshots: acquisition.records.clone(),
        });

        let mut orchestrator = Orchestrator::new(
            Arc::clone(&state),
            self.launchers.launcher_for(profile),
            Arc::clone(&self.registry),
            orch_config,
            &profile.name,
        )
        .with_checkpoint_sink(sink);
        if let Some(health) = &self.health {
            orchestrator = orchestrator.with_health(Arc::clone(health));
        }
        let orchestrator = Arc::new(orchestrator);

        *self.current.lock().expect("lock poisoned") = Some(Arc::clone(&orchestrator));
        if self.stop_requested.load(Ordering::SeqCst) {
            orchestrator.request_stop();
        }
        let end = orchestrator.run();
        *self.current.lock().expect("lock poisoned") = None;

        errors.extend(state.errors());

        // 6. Classification.
        let failed = state.failed_count();
        let skipped = state.skipped_count();
        let extras = state.any_extras_seen();
        let outcome = if failed == 0 && skipped == 0 && !extras {
            ProfileOutcome::Success
        } else if failed == 0 {
            ProfileOutcome::Warning
        } else {
            ProfileOutcome::Failed
        };

        // 7. Post-success retention, then release per policy.
        if failed == 0 && end == EndReason::Complete {
            self.retain_snapshots(profile, &acquisition.records);
        }
        self.release_snapshots(profile, &acquisition.records);

        let failed_chunks: Vec<FailedChunkDigest> = state
            .failed_chunks()
            .into_iter()
            .map(|f| FailedChunkDigest {
                source: f.chunk.source.clone(),
                exit_code: f.exit_code,
                error: f.error,
            })
            .collect();

        let report = ProfileReport {
            name: profile.name.clone(),
            outcome,
            total_chunks: state.total_chunks(),
            completed: state.completed_count(),
            failed,
            skipped,
            bytes_copied: state.bytes_complete(),
            extras_seen: extras,
            failed_chunks,
            message: match end {
                EndReason::Complete => None,
                reason => Some(format!("run ended early: {:?}", reason)),
            },
        };

        log::info!(
            "profile '{}' finished: {:?}, {}/{} chunks, {} failed, {} skipped",
            profile.name,
            outcome,
            report.completed,
            report.total_chunks,
            report.failed,
            report.skipped
        );

        (report, ProfileEnd::Ran(end))
    }

    fn acquire_snapshots(&self, profile: &Profile) -> Result<SnapshotAcquisition, AppError> {
        let mut acquisition = SnapshotAcquisition::new(profile);
        let (Some(manager), Some(policy)) = (self.snapshots.as_ref(), profile.snapshots.as_ref())
        else {
            return Ok(acquisition);
        };
        if !policy.any_side() {
            return Ok(acquisition);
        }

        let sides = [
            (policy.source_side, SnapshotSide::Source),
            (policy.destination_side, SnapshotSide::Destination),
        ];
        for (enabled, side) in sides {
            if !enabled {
                continue;
            }
            let path = match side {
                SnapshotSide::Source => acquisition.source.clone(),
                SnapshotSide::Destination => acquisition.destination.clone(),
            };
            let volume = VolumeKey::of_path(&path).ok_or_else(|| {
                AppError::ConfigError(format!("cannot determine the volume of {}", path))
            })?;

            match manager.create(&volume, side) {
                Ok(record) => {
                    let rewriter = PathRewriter::for_record(&record);
                    match side {
                        SnapshotSide::Source => {
                            acquisition.source = rewriter.rewrite(&acquisition.source);
                        }
                        SnapshotSide::Destination => {
                            acquisition.destination = rewriter.rewrite(&acquisition.destination);
                        }
                    }
                    acquisition.rewriters.push(rewriter);
                    acquisition.records.push(record);
                }
                Err(e) => {
                    // Release whatever this profile already took.
                    self.release_records(&acquisition.records);
                    return Err(e);
                }
            }
        }
        Ok(acquisition)
    }

    fn chunk_profile(
        &self,
        profile: &Profile,
        acquisition: &SnapshotAcquisition,
    ) -> Result<Vec<Chunk>, AppError> {
        let tree = self
            .profiler
            .profile_tree(&acquisition.source, Some(profile.chunking.max_depth))?;
        let ids = ChunkIdAllocator::new();
        let chunks = build_chunks(
            &tree,
            &acquisition.source,
            &acquisition.destination,
            &profile.chunking,
            &ids,
        );
        log::info!(
            "profile '{}' chunked into {} chunks ({} bytes)",
            profile.name,
            chunks.len(),
            tree.total_bytes
        );
        Ok(chunks)
    }

    fn retain_snapshots(&self, profile: &Profile, records: &[SnapshotRecord]) {
        let (Some(manager), Some(policy)) = (self.snapshots.as_ref(), profile.snapshots.as_ref())
        else {
            return;
        };
        for volume in distinct_volumes(records) {
            match manager.retain_after_success(&volume, policy.keep_per_volume) {
                Ok(0) => {}
                Ok(n) => log::info!("retention evicted {} snapshot(s) on {}", n, volume),
                Err(e) => log::warn!("retention on {} failed: {}", volume, e),
            }
        }
    }

    fn release_snapshots(&self, profile: &Profile, records: &[SnapshotRecord]) {
        let keep = profile.snapshots.as_ref().is_some_and(|p| p.persist);
        if keep {
            return;
        }
        self.release_records(records);
    }

    fn release_records(&self, records: &[SnapshotRecord]) {
        let Some(manager) = self.snapshots.as_ref() else {
            return;
        };
        for record in records {
            if let Err(e) = manager.delete(record) {
                log::warn!(
                    "could not release snapshot {} on {}: {}",
                    record.shadow_id,
                    record.volume,
                    e
                );
            }
        }
    }

    /// A checkpoint with session snapshots means the previous run never
    /// released them; trim the newest beyond each profile's keep count.
    fn cleanup_after_crash(&self, checkpoint: &Checkpoint, profiles: &[Profile]) {
        let Some(manager) = self.snapshots.as_ref() else {
            return;
        };
        if checkpoint.session_snapshots.is_empty() {
            return;
        }
        let keep = profiles
            .get(checkpoint.profile_index)
            .and_then(|p| p.snapshots.as_ref())
            .map(|p| p.keep_per_volume)
            .unwrap_or(1);
        for volume in distinct_volumes(&checkpoint.session_snapshots) {
            match manager.cleanup_crashed_run(&volume, keep) {
                Ok(0) => {}
                Ok(n) => log::warn!(
                    "crashed-run cleanup removed {} snapshot(s) on {}",
                    n,
                    volume
                ),
                Err(e) => log::warn!("crashed-run cleanup on {} failed: {}", volume, e),
            }
        }
    }
}

struct SnapshotAcquisition {
    source: String,
    destination: String,
    rewriters: Vec<PathRewriter>,
    records: Vec<SnapshotRecord>,
}

impl SnapshotAcquisition {
    fn new(profile: &Profile) -> Self {
        Self {
            source: profile.source.clone(),
            destination: profile.destination.clone(),
            rewriters: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Map a possibly-rewritten path back to its original volume form; this
    /// is the chunk identity checkpoints persist. Idempotent.
    fn restore(&self, path: &str) -> String {
        self.rewriters
            .iter()
            .fold(path.to_string(), |p, rewriter| rewriter.restore(&p))
    }
}

fn aborted_report(profile: &Profile, message: String) -> ProfileReport {
    ProfileReport {
        name: profile.name.clone(),
        outcome: ProfileOutcome::Aborted,
        total_chunks: 0,
        completed: 0,
        failed: 0,
        skipped: 0,
        bytes_copied: 0,
        extras_seen: false,
        failed_chunks: Vec::new(),
        message: Some(message),
    }
}

fn distinct_volumes(records: &[SnapshotRecord]) -> Vec<VolumeKey> {
    let mut volumes: Vec<VolumeKey> = Vec::new();
    for record in records {
        if !volumes.contains(&record.volume) {
            volumes.push(record.volume.clone());
        }
    }
    volumes
}

struct DriverCheckpointSink {
    store: Arc<CheckpointStore>,
    session_id: Uuid,
    run_started_at: DateTime<Utc>,
    profile_index: usize,
    profile_name: String,
    rewriters: Vec<PathRewriter>,
    session_snapshots: Vec<SnapshotRecord>,
}

impl CheckpointSink for DriverCheckpointSink {
    fn persist(&self, state: &RunState) {
        let completed_paths: Vec<String> = state
            .completed_paths()
            .into_iter()
            .map(|path| {
                self.rewriters
                    .iter()
                    .fold(path, |p, rewriter| rewriter.restore(&p))
            })
            .collect();

        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            session_id: self.session_id,
            saved_at: Utc::now(),
            profile_index: self.profile_index,
            profile_name: self.profile_name.clone(),
            completed_count: completed_paths.len() as u64,
            completed_paths,
            failed_count: state.failed_count(),
            bytes_complete: state.bytes_complete(),
            run_started_at: self.run_started_at,
            session_snapshots: self.session_snapshots.clone(),
        };

        if let Err(e) = self.store.save(&checkpoint) {
            log::warn!("checkpoint save failed, continuing: {}", e);
        }
    }
}
