use crate::models::summary::{ProfileOutcome, RunSummary};

/// End-of-run callback. Formatting and transport (mail, webhooks) live
/// outside the core; implementations receive the classified summary only.
pub trait NotificationHook: Send + Sync {
    fn on_run_complete(&self, summary: &RunSummary);
}

/// Default sink: writes the summary to the operational log.
pub struct LogNotificationHook;

impl NotificationHook for LogNotificationHook {
    fn on_run_complete(&self, summary: &RunSummary) {
        let line = format!(
            "run {} ended: {:?}, {} profiles, {}/{} chunks complete, {} failed, {} skipped, {} bytes, {}s",
            summary.session_id,
            summary.end_reason,
            summary.profiles.len(),
            summary.completed,
            summary.total_chunks,
            summary.failed,
            summary.skipped,
            summary.bytes_copied,
            summary.duration_secs(),
        );
        match summary.worst_outcome() {
            ProfileOutcome::Success => log::info!("{}", line),
            ProfileOutcome::Warning => log::warn!("{}", line),
            _ => log::error!("{}", line),
        }
        for error in &summary.errors {
            log::error!("  {}", error);
        }
    }
}

/// No-op hook for embedders that poll state themselves.
pub struct NullNotificationHook;

impl NotificationHook for NullNotificationHook {
    fn on_run_complete(&self, _summary: &RunSummary) {}
}
