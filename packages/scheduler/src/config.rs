//! Schedule configuration: a mapping from schedule-entry-name to the
//! trigger that fires it and the agent name it resolves to.
//!
//! This mirrors the original Celery beat schedule dict — `{task: ...,
//! trigger: ..., args: [agent_name]}` — except `task` is always the
//! generic "run agent" runner in this crate, so it is omitted: every entry
//! just names a [`Trigger`] and the agent it fires.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::trigger::Trigger;

/// One schedule entry: when to fire, and which registered agent to run.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub trigger: Trigger,
    pub agent_name: String,
}

/// The full schedule: entry name to [`ScheduleEntry`].
pub type ScheduleConfig = BTreeMap<String, ScheduleEntry>;

/// Builds the default schedule: the lead-generation pipeline once a day at
/// 08:00 UTC on weekdays, plus the onboarding-clients agent every 15
/// minutes. Binaries are free to build a different [`ScheduleConfig`]
/// instead — this is a convenience default, not a hardcoded requirement.
#[must_use]
pub fn default_schedule() -> ScheduleConfig {
    let mut schedule = ScheduleConfig::new();
    schedule.insert(
        "daily-lead-generation".to_string(),
        ScheduleEntry {
            trigger: Trigger::Cron {
                hour: 8,
                minute: 0,
                days: (1..=5).collect(),
            },
            agent_name: "lead_generation".to_string(),
        },
    );
    schedule.insert(
        "onboarding-clients".to_string(),
        ScheduleEntry {
            trigger: Trigger::Interval {
                period: Duration::from_secs(15 * 60),
            },
            agent_name: "onboarding_clients".to_string(),
        },
    );
    schedule
}
