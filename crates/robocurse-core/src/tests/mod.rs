pub mod test_launcher;
pub mod test_snapshot_provider;

#[cfg(test)]
mod snapshot_manager_tests;
