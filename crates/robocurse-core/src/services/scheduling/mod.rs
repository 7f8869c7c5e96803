pub mod scheduler;

pub use scheduler::{is_profile_due, next_run_time};
