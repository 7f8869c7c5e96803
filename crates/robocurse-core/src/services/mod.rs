// Subdirectories
pub mod chunker;
pub mod orchestrator;
pub mod scheduling;
pub mod snapshots;
pub mod worker;

// Root modules
pub mod checkpoint;
pub mod health;
pub mod notification;
pub mod preflight;
pub mod process_registry;
pub mod progress_aggregator;
pub mod run_driver;

// Re-exports for API stability
pub use checkpoint::CheckpointStore;
pub use health::{HealthPublisher, HealthStatus};
pub use notification::{LogNotificationHook, NotificationHook};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use process_registry::ProcessRegistry;
pub use progress_aggregator::ProgressAggregator;
pub use run_driver::{RunDriver, RunReport, WorkerLauncherFactory};
pub use snapshots::SnapshotManager;
