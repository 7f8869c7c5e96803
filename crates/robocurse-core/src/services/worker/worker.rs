use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::copy_client::{CopyClient, CopyError};
use crate::error::AppError;
use crate::models::chunk::Chunk;
use crate::models::profile::CopyOptions;
use crate::models::progress::ProgressSnapshot;
use crate::services::process_registry::ProcessRegistry;
use crate::services::worker::command_builder::build_copy_args;
use crate::services::worker::exit_code::{classify_exit_code, ClassifyOptions, Severity};
use crate::services::worker::job_runner::{attach_readers, StreamCapture};
use crate::services::worker::log_summary::parse_log_summary;
use crate::services::worker::progress::ProgressBuffer;
use crate::services::worker::{ActiveJob, ExitInfo, JobLauncher};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches one worker process per chunk and wraps its lifecycle: streaming
/// progress capture, exit-code interpretation and log-file totals.
pub struct CopyWorker {
    client: Arc<dyn CopyClient>,
    registry: Arc<ProcessRegistry>,
    options: CopyOptions,
}

impl CopyWorker {
    pub fn new(
        client: Arc<dyn CopyClient>,
        registry: Arc<ProcessRegistry>,
        options: CopyOptions,
    ) -> Self {
        Self {
            client,
            registry,
            options,
        }
    }

    fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            strict_extras: self.options.strict_extras,
            strict_mismatches: self.options.strict_mismatches,
        }
    }
}

impl JobLauncher for CopyWorker {
    fn launch(&self, chunk: &mut Chunk, log_path: &Path) -> Result<Box<dyn ActiveJob>, AppError> {
        if let Some(parent) = log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("failed to create log directory {}: {}", parent.display(), e);
            }
        }

        let args = build_copy_args(chunk, &self.options, log_path);
        chunk.args = args.clone();

        let mut child = self.client.spawn(&args)?;
        let pid = child.id();

        let buffer = Arc::new(ProgressBuffer::new());
        let capture = attach_readers(&mut child, Arc::clone(&buffer))?;

        let child = Arc::new(Mutex::new(child));
        self.registry.register(pid, Arc::clone(&child));

        log::debug!(
            "chunk {} worker started, pid {} → {}",
            chunk.id,
            pid,
            log_path.display()
        );

        Ok(Box::new(WorkerJob {
            chunk_id: chunk.id,
            pid,
            child,
            buffer,
            capture,
            log_path: log_path.to_path_buf(),
            started_at: Utc::now(),
            classify_options: self.classify_options(),
            registry: Arc::clone(&self.registry),
            cached_exit: None,
            stopped: false,
        }))
    }
}

pub struct WorkerJob {
    chunk_id: u64,
    pid: u32,
    child: Arc<Mutex<Child>>,
    buffer: Arc<ProgressBuffer>,
    capture: StreamCapture,
    log_path: PathBuf,
    started_at: DateTime<Utc>,
    classify_options: ClassifyOptions,
    registry: Arc<ProcessRegistry>,
    cached_exit: Option<i32>,
    stopped: bool,
}

impl WorkerJob {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn try_exit_code(&mut self) -> Option<i32> {
        if let Some(code) = self.cached_exit {
            return Some(code);
        }
        let mut child = self.child.lock().expect("lock poisoned");
        match child.try_wait() {
            // A killed worker has no code; fold it into the fatal range.
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(-1);
                self.cached_exit = Some(code);
                Some(code)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("pid {} wait error: {}", self.pid, e);
                self.cached_exit = Some(-1);
                Some(-1)
            }
        }
    }

    fn read_log(&self) -> Option<String> {
        match std::fs::read(&self.log_path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
            Err(e) => {
                log::warn!("cannot read worker log {}: {}", self.log_path.display(), e);
                None
            }
        }
    }
}

impl ActiveJob for WorkerJob {
    fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn progress(&self) -> ProgressSnapshot {
        self.buffer.snapshot()
    }

    fn has_exited(&mut self) -> bool {
        self.try_exit_code().is_some()
    }

    fn wait(&mut self, timeout: Duration) -> Result<ExitInfo, AppError> {
        let deadline = Instant::now() + timeout;
        let exit_code = loop {
            if let Some(code) = self.try_exit_code() {
                break code;
            }
            if Instant::now() >= deadline {
                return Err(AppError::CopyError(CopyError::IoError(format!(
                    "worker pid {} still running after {:?}",
                    self.pid, timeout
                ))));
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(timeout));
        };

        self.registry.deregister(self.pid);

        let mut classification = classify_exit_code(exit_code, self.classify_options);
        if classification.severity == Severity::Fatal {
            let stderr = self.capture.stderr_tail();
            if !stderr.is_empty() {
                classification.message = format!("{}: {}", classification.message, stderr);
            }
        }

        let tally = self.read_log().and_then(|text| parse_log_summary(&text));

        Ok(ExitInfo {
            exit_code,
            classification,
            tally,
        })
    }

    fn stop(&mut self, grace: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.registry.terminate(self.pid, grace);
    }

    fn extras_seen(&self) -> bool {
        self.buffer.extras_seen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy_client::CopyOutput;
    use std::process::{Command, Stdio};

    /// Copy client standing in for the real tool with a shell script, so the
    /// full spawn → stream → wait path runs against live processes.
    struct ShellClient {
        script: String,
    }

    impl CopyClient for ShellClient {
        fn spawn(&self, _args: &[String]) -> Result<Child, CopyError> {
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(&self.script)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command.process_group(0);
            }
            command.spawn().map_err(|e| CopyError::IoError(e.to_string()))
        }

        fn list(&self, _source: &str, _max_depth: Option<u32>) -> Result<CopyOutput, CopyError> {
            unimplemented!("not used by worker tests")
        }

        fn version(&self) -> Result<String, CopyError> {
            Ok("shell".to_string())
        }
    }

    fn launch(script: &str, log_path: &Path) -> (Box<dyn ActiveJob>, Arc<ProcessRegistry>) {
        let registry = Arc::new(ProcessRegistry::new());
        let worker = CopyWorker::new(
            Arc::new(ShellClient {
                script: script.to_string(),
            }),
            Arc::clone(&registry),
            CopyOptions::default(),
        );
        let mut chunk = Chunk::new(1, "/src".into(), "/dst".into(), 30, 3, 0, false);
        let job = worker.launch(&mut chunk, log_path).unwrap();
        assert!(!chunk.args.is_empty());
        (job, registry)
    }

    #[test]
    fn successful_worker_classifies_and_reads_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("chunk-1.log");
        std::fs::write(
            &log_path,
            "\
               Total    Copied   Skipped  Mismatch    FAILED    Extras
    Dirs :         1         1         0         0         0         0
   Files :         3         3         0         0         0         0
   Bytes :        60        60         0         0         0         0
",
        )
        .unwrap();

        let (mut job, registry) = launch("printf '100%%\\n'; exit 1", &log_path);
        let info = job.wait(Duration::from_secs(5)).unwrap();

        assert_eq!(info.exit_code, 1);
        assert_eq!(
            info.classification.severity,
            Severity::Success
        );
        let tally = info.tally.unwrap();
        assert_eq!(tally.bytes.copied, 60);
        assert_eq!(tally.files.copied, 3);
        assert!(registry.is_empty(), "wait() must deregister the pid");
    }

    #[test]
    fn failure_exit_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let (mut job, _registry) = launch("exit 8", &dir.path().join("c.log"));
        let info = job.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(info.exit_code, 8);
        assert!(info.classification.should_retry);
        assert!(info.tally.is_none());
    }

    #[test]
    fn fatal_exit_carries_stderr_detail() {
        let dir = tempfile::tempdir().unwrap();
        let (mut job, _registry) = launch("echo 'access denied' >&2; exit 16", &dir.path().join("c.log"));
        // Give the stderr reader a beat to drain.
        std::thread::sleep(Duration::from_millis(100));
        let info = job.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(
            info.classification.severity,
            Severity::Fatal
        );
        assert!(info.classification.message.contains("access denied"));
    }

    #[test]
    fn wait_times_out_on_running_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (mut job, registry) = launch("sleep 30", &dir.path().join("c.log"));
        let result = job.wait(Duration::from_millis(100));
        assert!(result.is_err());

        job.stop(Duration::from_millis(100));
        registry.terminate_all(Duration::from_millis(100));
    }

    #[test]
    fn stop_kills_a_running_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (mut job, _registry) = launch("sleep 30", &dir.path().join("c.log"));
        assert!(!job.has_exited());

        job.stop(Duration::from_millis(100));
        // Second stop is a no-op.
        job.stop(Duration::from_millis(100));

        for _ in 0..50 {
            if job.has_exited() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("worker survived stop()");
    }

    #[test]
    fn progress_streams_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let script = "printf '\\t  New File  \\t\\t 10\\tC:/a.bin\\n100%%\\n'; sleep 5";
        let (mut job, _registry) = launch(script, &dir.path().join("c.log"));

        let mut bytes = 0;
        for _ in 0..100 {
            bytes = job.progress().bytes_copied;
            if bytes > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(bytes, 10);
        job.stop(Duration::from_millis(50));
    }
}
