use std::time::Duration;

use crate::models::settings::RetrySettings;

/// Exponential backoff with a hard cap, plus the retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            multiplier,
            cap,
        }
    }

    /// `min(base × multiplier^retry_count, cap)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = self.multiplier.powi(retry_count as i32);
        let secs = self.base.as_secs_f64() * factor;
        if secs >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether a chunk that failed retryably still has budget left.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base: Duration::from_secs(settings.backoff_base_secs),
            multiplier: settings.backoff_multiplier,
            cap: Duration::from_secs(settings.backoff_cap_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(5), 2.0, Duration::from_secs(120))
    }

    #[test]
    fn backoff_doubles_from_base() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(5));
        assert_eq!(p.backoff(1), Duration::from_secs(10));
        assert_eq!(p.backoff(2), Duration::from_secs(20));
        assert_eq!(p.backoff(3), Duration::from_secs(40));
    }

    #[test]
    fn backoff_caps() {
        let p = policy();
        assert_eq!(p.backoff(5), Duration::from_secs(120));
        assert_eq!(p.backoff(30), Duration::from_secs(120));
    }

    #[test]
    fn huge_retry_count_does_not_overflow() {
        let p = policy();
        assert_eq!(p.backoff(u32::MAX), Duration::from_secs(120));
    }

    #[test]
    fn retry_budget_boundary() {
        let p = policy();
        assert!(p.allows_retry(0));
        assert!(p.allows_retry(2));
        // At the budget, a retryable failure still classifies as failed.
        assert!(!p.allows_retry(3));
        assert!(!p.allows_retry(4));
    }

    #[test]
    fn from_settings() {
        let p = RetryPolicy::from(&RetrySettings::default());
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base, Duration::from_secs(5));
        assert_eq!(p.cap, Duration::from_secs(120));
    }
}
