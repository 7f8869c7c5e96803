use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::models::progress::RunProgress;

/// Displayed ETAs are capped to keep cold-start rate estimates from
/// producing absurd values.
const MAX_ETA_SECS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_RATE_WINDOW: usize = 20;

/// Folds retired-chunk totals and in-flight worker progress into run-wide
/// numbers, with a windowed transfer rate for the ETA.
pub struct ProgressAggregator {
    total_bytes: u64,
    retired_bytes: u64,
    retired_files: u64,
    samples: VecDeque<(DateTime<Utc>, u64)>,
    window: usize,
}

impl ProgressAggregator {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            retired_bytes: 0,
            retired_files: 0,
            samples: VecDeque::new(),
            window: DEFAULT_RATE_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    pub fn set_total_bytes(&mut self, total: u64) {
        self.total_bytes = total;
    }

    /// Fold in a chunk that reached a terminal state. Bytes are accounted
    /// exactly once here, so a retried chunk never double-counts: only its
    /// final successful run retires.
    pub fn add_retired(&mut self, bytes: u64, files: u64) {
        self.retired_bytes += bytes;
        self.retired_files += files;
    }

    /// Record one tick's observation of in-flight progress and produce the
    /// aggregate view.
    pub fn record(
        &mut self,
        inflight_bytes: u64,
        inflight_files: u64,
        now: DateTime<Utc>,
    ) -> RunProgress {
        let bytes_copied = self.retired_bytes + inflight_bytes;
        let files_copied = self.retired_files + inflight_files;

        self.samples.push_back((now, bytes_copied));
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }

        let rate = self.windowed_rate();
        let remaining = self.total_bytes.saturating_sub(bytes_copied);
        let eta_secs = if remaining == 0 {
            Some(0)
        } else if rate == 0 {
            None
        } else {
            Some((remaining / rate).min(MAX_ETA_SECS))
        };

        RunProgress {
            total_bytes: self.total_bytes,
            bytes_copied,
            files_copied,
            rate_bytes_per_sec: rate,
            eta_secs,
        }
    }

    fn windowed_rate(&self) -> u64 {
        let (Some((first_at, first_bytes)), Some((last_at, last_bytes))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0;
        };
        let elapsed = (*last_at - *first_at).num_milliseconds();
        if elapsed <= 0 || last_bytes <= first_bytes {
            return 0;
        }
        ((last_bytes - first_bytes) as f64 / (elapsed as f64 / 1000.0)) as u64
    }
}
