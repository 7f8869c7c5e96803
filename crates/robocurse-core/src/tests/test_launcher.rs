use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::copy_client::CopyError;
use crate::error::AppError;
use crate::models::chunk::Chunk;
use crate::models::progress::{CopyTally, ProgressSnapshot, TallyRow};
use crate::services::worker::exit_code::{classify_exit_code, ClassifyOptions};
use crate::services::worker::{ActiveJob, ExitInfo, JobLauncher};

/// One scripted worker outcome.
#[derive(Debug, Clone)]
pub struct ScriptedExit {
    pub exit_code: i32,
    pub bytes_copied: u64,
    pub files_copied: u64,
    /// Keep the job "running" until stopped, for concurrency and stop tests.
    pub hang: bool,
}

impl ScriptedExit {
    pub fn success(bytes: u64, files: u64) -> Self {
        Self {
            exit_code: 1,
            bytes_copied: bytes,
            files_copied: files,
            hang: false,
        }
    }

    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code,
            bytes_copied: 0,
            files_copied: 0,
            hang: false,
        }
    }

    pub fn hanging() -> Self {
        Self {
            exit_code: 1,
            bytes_copied: 0,
            files_copied: 0,
            hang: true,
        }
    }
}

/// Launcher double: scripts outcomes per chunk source path, in order. A
/// source with no script succeeds with the chunk's estimated totals.
pub struct ScriptedLauncher {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedExit>>>,
    launch_log: Mutex<Vec<String>>,
    fail_launch: Mutex<Vec<String>>,
    next_pid: AtomicU32,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            launch_log: Mutex::new(Vec::new()),
            fail_launch: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(100),
        }
    }

    pub fn script(&self, source: &str, exits: Vec<ScriptedExit>) {
        self.scripts
            .lock()
            .expect("lock poisoned")
            .insert(source.to_string(), exits.into());
    }

    pub fn fail_launches_of(&self, source: &str) {
        self.fail_launch
            .lock()
            .expect("lock poisoned")
            .push(source.to_string());
    }

    /// Source paths in launch order, retries included.
    pub fn launches(&self) -> Vec<String> {
        self.launch_log.lock().expect("lock poisoned").clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launch_log.lock().expect("lock poisoned").len()
    }
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLauncher for ScriptedLauncher {
    fn launch(&self, chunk: &mut Chunk, _log_path: &Path) -> Result<Box<dyn ActiveJob>, AppError> {
        self.launch_log
            .lock()
            .expect("lock poisoned")
            .push(chunk.source.clone());

        if self
            .fail_launch
            .lock()
            .expect("lock poisoned")
            .contains(&chunk.source)
        {
            return Err(AppError::CopyError(CopyError::ToolNotFound));
        }

        let exit = self
            .scripts
            .lock()
            .expect("lock poisoned")
            .get_mut(&chunk.source)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                ScriptedExit::success(chunk.estimated_bytes, chunk.estimated_files)
            });

        Ok(Box::new(ScriptedJob {
            chunk_id: chunk.id,
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit,
            stopped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

pub struct ScriptedJob {
    chunk_id: u64,
    pid: u32,
    exit: ScriptedExit,
    stopped: Arc<AtomicBool>,
}

impl ActiveJob for ScriptedJob {
    fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot::empty()
    }

    fn has_exited(&mut self) -> bool {
        !self.exit.hang || self.stopped.load(Ordering::SeqCst)
    }

    fn wait(&mut self, _timeout: Duration) -> Result<ExitInfo, AppError> {
        if self.exit.hang && !self.stopped.load(Ordering::SeqCst) {
            return Err(AppError::CopyError(CopyError::IoError(
                "scripted job still running".to_string(),
            )));
        }

        let classification = classify_exit_code(self.exit.exit_code, ClassifyOptions::default());
        // Failed workers leave no stats block behind.
        let tally = if self.exit.exit_code < 8 && self.exit.exit_code >= 0 {
            Some(CopyTally {
                dirs: TallyRow::default(),
                files: TallyRow {
                    total: self.exit.files_copied,
                    copied: self.exit.files_copied,
                    extras: if self.exit.exit_code & 2 != 0 { 1 } else { 0 },
                    ..TallyRow::default()
                },
                bytes: TallyRow {
                    total: self.exit.bytes_copied,
                    copied: self.exit.bytes_copied,
                    ..TallyRow::default()
                },
                speed_bytes_per_sec: None,
            })
        } else {
            None
        };

        Ok(ExitInfo {
            exit_code: self.exit.exit_code,
            classification,
            tally,
        })
    }

    fn stop(&mut self, _grace: Duration) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn extras_seen(&self) -> bool {
        self.exit.exit_code >= 0 && self.exit.exit_code & 2 != 0
    }
}
