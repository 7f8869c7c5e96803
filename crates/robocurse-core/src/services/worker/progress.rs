use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};

use regex::Regex;

use crate::models::progress::ProgressSnapshot;

// Copy tool streaming output, one event per line:
//
//        New File             1048576    C:\data\docs\report.docx
//          Newer                  512    C:\data\docs\notes.txt
//           same                 2048    C:\data\docs\old.txt
//     *EXTRA File               77824    E:\backup\docs\stale.txt
//       New Dir          3    C:\data\docs\sub\
//   45.2%
//  100%
static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(New File|Newer|Older|Changed|Modified|same|lonely|\*EXTRA File|\*MISMATCH)\s+(\d+)\s+(.+?)\s*$",
    )
    .expect("invalid file line regex")
});

static DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(New Dir|\*EXTRA Dir)\s+(-?\d+)\s+(.+?)\s*$").expect("invalid dir line regex")
});

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,3}(?:\.\d+)?)%\s*$").expect("invalid percent regex"));

/// One parsed line of the copy tool's streaming output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The tool started processing a source file.
    FileStart { path: String, size: u64 },
    /// In-progress percentage for the current file.
    FileProgress { percent: f64 },
    /// The current file finished copying (a bare `100%` line).
    FileComplete,
    /// The tool entered a directory.
    DirEnter { path: String, entries: i64 },
    /// A destination-only file was reported; nothing is copied for it.
    ExtraFile { path: String, size: u64 },
    /// A source file the tool decided not to copy (`same`, `lonely`).
    FileUnchanged { path: String, size: u64 },
}

/// Parse one stdout line. `None` means the line carries no progress
/// information (headers, blank lines, the final stats block).
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    if let Some(caps) = PERCENT_RE.captures(line) {
        let percent: f64 = caps[1].parse().ok()?;
        if percent >= 100.0 {
            return Some(ProgressEvent::FileComplete);
        }
        return Some(ProgressEvent::FileProgress { percent });
    }

    if let Some(caps) = FILE_RE.captures(line) {
        let category = &caps[1];
        let size: u64 = caps[2].parse().ok()?;
        let path = caps[3].to_string();
        return Some(match category {
            "*EXTRA File" => ProgressEvent::ExtraFile { path, size },
            "same" | "lonely" | "*MISMATCH" => ProgressEvent::FileUnchanged { path, size },
            _ => ProgressEvent::FileStart { path, size },
        });
    }

    if let Some(caps) = DIR_RE.captures(line) {
        let entries: i64 = caps[2].parse().ok()?;
        return Some(ProgressEvent::DirEnter {
            path: caps[3].to_string(),
            entries,
        });
    }

    None
}

#[derive(Debug, Default)]
struct CurrentFile {
    path: Option<String>,
    size: u64,
    observed: u64,
    counted: bool,
}

/// Thread-safe rolling aggregate over a worker's streaming output.
///
/// Reader threads push lines, the orchestrator polls snapshots. The
/// aggregate of completed-file bytes plus current-file bytes observed so far
/// never decreases, even as the current file changes.
pub struct ProgressBuffer {
    completed_bytes: AtomicU64,
    files_copied: AtomicU64,
    extras_seen: AtomicU64,
    line_count: AtomicU64,
    recognized: AtomicU64,
    current: Mutex<CurrentFile>,
}

impl ProgressBuffer {
    pub fn new() -> Self {
        Self {
            completed_bytes: AtomicU64::new(0),
            files_copied: AtomicU64::new(0),
            extras_seen: AtomicU64::new(0),
            line_count: AtomicU64::new(0),
            recognized: AtomicU64::new(0),
            current: Mutex::new(CurrentFile::default()),
        }
    }

    pub fn push_line(&self, line: &str) {
        self.line_count.fetch_add(1, Ordering::Relaxed);
        if let Some(event) = parse_progress_line(line) {
            self.recognized.fetch_add(1, Ordering::Relaxed);
            self.apply(event);
        }
    }

    pub fn apply(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FileStart { path, size } => {
                let mut current = self.current.lock().expect("lock poisoned");
                self.fold_current(&mut current);
                current.path = Some(path);
                current.size = size;
                current.observed = 0;
                current.counted = false;
            }
            ProgressEvent::FileProgress { percent } => {
                let mut current = self.current.lock().expect("lock poisoned");
                let observed = (current.size as f64 * percent / 100.0) as u64;
                current.observed = current.observed.max(observed.min(current.size));
            }
            ProgressEvent::FileComplete => {
                let mut current = self.current.lock().expect("lock poisoned");
                current.observed = current.size;
                if !current.counted && current.path.is_some() {
                    current.counted = true;
                    self.files_copied.fetch_add(1, Ordering::Relaxed);
                }
            }
            ProgressEvent::FileUnchanged { .. } => {
                let mut current = self.current.lock().expect("lock poisoned");
                self.fold_current(&mut current);
            }
            ProgressEvent::ExtraFile { .. } => {
                self.extras_seen.fetch_add(1, Ordering::Relaxed);
            }
            ProgressEvent::DirEnter { .. } => {}
        }
    }

    /// Move the finished current file's bytes into the completed total.
    fn fold_current(&self, current: &mut CurrentFile) {
        if current.observed > 0 {
            self.completed_bytes
                .fetch_add(current.observed, Ordering::Relaxed);
        }
        current.path = None;
        current.size = 0;
        current.observed = 0;
        current.counted = false;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let current = self.current.lock().expect("lock poisoned");
        let lines = self.line_count.load(Ordering::Relaxed);
        ProgressSnapshot {
            bytes_copied: self.completed_bytes.load(Ordering::Relaxed) + current.observed,
            files_copied: self.files_copied.load(Ordering::Relaxed),
            current_file: current.path.clone(),
            current_file_bytes: current.observed,
            line_count: lines,
            parse_success: lines == 0 || self.recognized.load(Ordering::Relaxed) > 0,
        }
    }

    pub fn extras_seen(&self) -> bool {
        self.extras_seen.load(Ordering::Relaxed) > 0
    }
}

impl Default for ProgressBuffer {
    fn default() -> Self {
        Self::new()
    }
}
