//! Trigger definitions: when a schedule entry fires.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

/// When a schedule entry should fire.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Cron-like: a specific hour:minute on a set of ISO weekdays
    /// (1=Monday..7=Sunday). Fires at most once per calendar day.
    Cron {
        hour: u32,
        minute: u32,
        days: BTreeSet<u8>,
    },
    /// Fires once per fixed period, measured from the scheduler's start.
    Interval { period: std::time::Duration },
}

impl Trigger {
    /// Whether this trigger should fire now, given the last UTC calendar
    /// date it fired (`None` if it has never fired). `Cron` triggers fire
    /// once the wall clock reaches or passes `hour:minute` on an allowed
    /// day, and only once per day; `Interval` triggers are evaluated by
    /// the caller using elapsed time instead and always report `false`
    /// here (see [`Scheduler`](crate::Scheduler) for interval handling).
    #[must_use]
    pub fn should_fire_cron(&self, now: DateTime<Utc>, last_fired: Option<NaiveDate>) -> bool {
        match self {
            Self::Cron { hour, minute, days } => {
                let today = now.date_naive();
                if last_fired == Some(today) {
                    return false;
                }
                let weekday = u8::try_from(now.weekday().number_from_monday()).unwrap_or(1);
                if !days.contains(&weekday) {
                    return false;
                }
                now.hour() >= *hour && (now.hour() > *hour || now.minute() >= *minute)
            }
            Self::Interval { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn does_not_fire_before_schedule_time() {
        let trigger = Trigger::Cron {
            hour: 8,
            minute: 0,
            days: BTreeSet::from([1, 2, 3, 4, 5]),
        };
        // 2026-07-27 is a Monday.
        let now = at(2026, 7, 27, 7, 59);
        assert!(!trigger.should_fire_cron(now, None));
    }

    #[test]
    fn fires_once_schedule_time_is_reached() {
        let trigger = Trigger::Cron {
            hour: 8,
            minute: 0,
            days: BTreeSet::from([1, 2, 3, 4, 5]),
        };
        let now = at(2026, 7, 27, 8, 0);
        assert!(trigger.should_fire_cron(now, None));
    }

    #[test]
    fn does_not_refire_same_day() {
        let trigger = Trigger::Cron {
            hour: 8,
            minute: 0,
            days: BTreeSet::from([1, 2, 3, 4, 5]),
        };
        let now = at(2026, 7, 27, 9, 30);
        assert!(!trigger.should_fire_cron(now, Some(now.date_naive())));
    }

    #[test]
    fn skips_disallowed_weekday() {
        let trigger = Trigger::Cron {
            hour: 8,
            minute: 0,
            days: BTreeSet::from([1, 2, 3, 4, 5]),
        };
        // 2026-08-01 is a Saturday.
        let now = at(2026, 8, 1, 9, 0);
        assert!(!trigger.should_fire_cron(now, None));
    }
}
