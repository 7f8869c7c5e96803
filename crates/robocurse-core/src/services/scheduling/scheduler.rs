use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use croner::Cron;

use crate::models::schedule::{ScheduleConfig, ScheduleType};

/// Whether a scheduled profile is due to run, given when it last ran.
///
/// Host integration (actually firing at these times) is the embedder's job;
/// the core only answers the question.
pub fn is_profile_due(
    schedule: &ScheduleConfig,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if !schedule.enabled {
        return false;
    }

    match &schedule.schedule_type {
        ScheduleType::Cron { expression } => {
            let cron = match Cron::from_str(expression) {
                Ok(c) => c,
                Err(_) => return false,
            };

            match last_run {
                Some(last) => match cron.find_next_occurrence(&last, false) {
                    Ok(next) => next <= now,
                    Err(_) => false,
                },
                // Never run before — due immediately
                None => true,
            }
        }
        ScheduleType::Interval { minutes } => match last_run {
            Some(last) => now.signed_duration_since(last) >= Duration::minutes(*minutes as i64),
            None => true,
        },
    }
}

/// Next run time for a schedule, from the given instant. `None` when the
/// schedule is disabled or the cron expression is invalid.
pub fn next_run_time(schedule: &ScheduleConfig, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !schedule.enabled {
        return None;
    }

    match &schedule.schedule_type {
        ScheduleType::Cron { expression } => {
            let cron = Cron::from_str(expression).ok()?;
            cron.find_next_occurrence(&from, false).ok()
        }
        ScheduleType::Interval { minutes } => Some(from + Duration::minutes(*minutes as i64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(schedule_type: ScheduleType, enabled: bool) -> ScheduleConfig {
        ScheduleConfig {
            schedule_type,
            enabled,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, hour, minute, 0).unwrap()
    }

    #[test]
    fn interval_never_run_is_due() {
        let s = schedule(ScheduleType::Interval { minutes: 30 }, true);
        assert!(is_profile_due(&s, None, at(12, 0)));
    }

    #[test]
    fn interval_elapsed_is_due() {
        let s = schedule(ScheduleType::Interval { minutes: 30 }, true);
        assert!(is_profile_due(&s, Some(at(11, 29)), at(12, 0)));
        assert!(!is_profile_due(&s, Some(at(11, 45)), at(12, 0)));
    }

    #[test]
    fn interval_exact_boundary_is_due() {
        let s = schedule(ScheduleType::Interval { minutes: 60 }, true);
        assert!(is_profile_due(&s, Some(at(11, 0)), at(12, 0)));
    }

    #[test]
    fn disabled_schedule_never_due() {
        let s = schedule(ScheduleType::Interval { minutes: 1 }, false);
        assert!(!is_profile_due(&s, Some(at(1, 0)), at(12, 0)));
        assert!(is_profile_due(
            &schedule(ScheduleType::Interval { minutes: 1 }, true),
            Some(at(1, 0)),
            at(12, 0)
        ));
    }

    #[test]
    fn cron_due_after_occurrence_passes() {
        // 02:00 every day
        let s = schedule(
            ScheduleType::Cron {
                expression: "0 2 * * *".into(),
            },
            true,
        );
        assert!(is_profile_due(&s, Some(at(1, 0)), at(3, 0)));
        assert!(!is_profile_due(&s, Some(at(2, 30)), at(3, 0)));
    }

    #[test]
    fn cron_never_run_is_due() {
        let s = schedule(
            ScheduleType::Cron {
                expression: "0 2 * * *".into(),
            },
            true,
        );
        assert!(is_profile_due(&s, None, at(12, 0)));
    }

    #[test]
    fn invalid_cron_is_never_due() {
        let s = schedule(
            ScheduleType::Cron {
                expression: "not a cron".into(),
            },
            true,
        );
        assert!(!is_profile_due(&s, Some(at(1, 0)), at(12, 0)));
        assert!(next_run_time(&s, at(12, 0)).is_none());
    }

    #[test]
    fn next_run_time_interval() {
        let s = schedule(ScheduleType::Interval { minutes: 45 }, true);
        assert_eq!(next_run_time(&s, at(12, 0)), Some(at(12, 45)));
    }

    #[test]
    fn next_run_time_cron() {
        let s = schedule(
            ScheduleType::Cron {
                expression: "0 2 * * *".into(),
            },
            true,
        );
        let next = next_run_time(&s, at(3, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 16, 2, 0, 0).unwrap());
    }

    #[test]
    fn next_run_time_disabled_is_none() {
        let s = schedule(ScheduleType::Interval { minutes: 45 }, false);
        assert!(next_run_time(&s, at(12, 0)).is_none());
    }
}
