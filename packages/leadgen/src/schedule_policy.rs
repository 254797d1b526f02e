//! The lead-generation pipeline process's own daily scheduling policy
//! (§4.E.6), distinct from the generic cron entries the
//! `agentops_scheduler` crate can also fire `lead_generation` on.
//!
//! This is the in-process equivalent of the original system's standalone
//! `schedule`-library loop: a single daily fire time, a set of allowed
//! weekdays, a configurable timezone, and boot/catch-up bookkeeping so a
//! process that starts after today's fire time doesn't immediately fire.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};

use crate::PipelineError;

/// The pipeline process's daily fire time, allowed weekdays, and timezone,
/// parsed once from environment configuration.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    hour: u32,
    minute: u32,
    days: BTreeSet<u8>,
    tz: FixedOffset,
    poll_interval: Duration,
    run_on_startup: bool,
    catchup_on_boot: bool,
}

impl SchedulePolicy {
    /// Parses the policy from `SCHEDULE_TIME`/`SCHEDULE_TIME_OVERRIDE`,
    /// `SCHEDULE_DAYS`, `TZ`, `SCHEDULER_POLL_SECONDS`, `RUN_ON_STARTUP`,
    /// and `SCHEDULE_CATCHUP_ON_BOOT`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `SCHEDULE_TIME` isn't `HH:MM`,
    /// `SCHEDULE_DAYS` isn't a valid day-range spec, or `TZ` isn't `UTC`
    /// or a fixed `+HH:MM`/`-HH:MM` offset.
    pub fn from_env() -> Result<Self, PipelineError> {
        let (hour, minute) = parse_schedule_time(&crate::config::schedule_time())?;
        let days = agentops_scheduler::day_range::parse_days(&crate::config::schedule_days())
            .map_err(|e| PipelineError::Config { message: e.to_string() })?;
        let tz = parse_tz_offset(&crate::config::timezone())?;

        Ok(Self {
            hour,
            minute,
            days,
            tz,
            poll_interval: Duration::from_secs(crate::config::scheduler_poll_seconds()),
            run_on_startup: crate::config::run_on_startup(),
            catchup_on_boot: crate::config::schedule_catchup_on_boot(),
        })
    }

    /// The local calendar date and whether `now` has reached or passed
    /// the configured fire time on an allowed weekday.
    fn local_date_and_due(&self, now: DateTime<Utc>) -> (NaiveDate, bool) {
        let local = now.with_timezone(&self.tz);
        let weekday = u8::try_from(chrono::Datelike::weekday(&local).number_from_monday()).unwrap_or(1);
        let day_ok = self.days.contains(&weekday);
        let time_ok = local.hour() > self.hour || (local.hour() == self.hour && local.minute() >= self.minute);
        (local.date_naive(), day_ok && time_ok)
    }

    /// Whether the pipeline should fire now, given the local date it last
    /// fired on (`None` if never). Fires at most once per local calendar
    /// date.
    #[must_use]
    pub fn due(&self, now: DateTime<Utc>, last_fired: Option<NaiveDate>) -> bool {
        let (today, time_ok) = self.local_date_and_due(now);
        time_ok && last_fired != Some(today)
    }

    /// Boot-time catch-up bookkeeping: if the process starts after the
    /// fire time on an allowed day and catch-up is disabled (the
    /// default), today is marked as already fired so the loop doesn't
    /// immediately fire a stale run.
    #[must_use]
    pub fn boot_already_fired(&self, started_at: DateTime<Utc>) -> Option<NaiveDate> {
        if self.catchup_on_boot {
            return None;
        }
        let (today, time_ok) = self.local_date_and_due(started_at);
        time_ok.then_some(today)
    }

    #[must_use]
    pub const fn run_on_startup(&self) -> bool {
        self.run_on_startup
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Parses `HH:MM` into (hour, minute).
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the string isn't `HH:MM` with
/// `hour` in `0..24` and `minute` in `0..60`.
pub fn parse_schedule_time(spec: &str) -> Result<(u32, u32), PipelineError> {
    let (h, m) = spec.trim().split_once(':').ok_or_else(|| PipelineError::Config {
        message: format!("SCHEDULE_TIME {spec:?} is not HH:MM"),
    })?;
    let hour: u32 = h.parse().map_err(|_| PipelineError::Config {
        message: format!("SCHEDULE_TIME {spec:?} has an invalid hour"),
    })?;
    let minute: u32 = m.parse().map_err(|_| PipelineError::Config {
        message: format!("SCHEDULE_TIME {spec:?} has an invalid minute"),
    })?;
    if hour >= 24 || minute >= 60 {
        return Err(PipelineError::Config {
            message: format!("SCHEDULE_TIME {spec:?} is out of range"),
        });
    }
    Ok((hour, minute))
}

/// Parses `UTC` or a fixed `+HH:MM`/`-HH:MM` offset. Full IANA timezone
/// database support (DST transitions, named zones) is not carried —
/// see `DESIGN.md` for the tradeoff.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if `spec` is neither.
pub fn parse_tz_offset(spec: &str) -> Result<FixedOffset, PipelineError> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("UTC") || spec.is_empty() {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match spec.as_bytes().first() {
        Some(b'+') => (1, &spec[1..]),
        Some(b'-') => (-1, &spec[1..]),
        _ => {
            return Err(PipelineError::Config {
                message: format!("TZ {spec:?} must be UTC or a +HH:MM/-HH:MM offset"),
            })
        }
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().map_err(|_| PipelineError::Config {
        message: format!("TZ {spec:?} has an invalid offset"),
    })?;
    let minutes: i32 = m.parse().map_err(|_| PipelineError::Config {
        message: format!("TZ {spec:?} has an invalid offset"),
    })?;
    let total_seconds = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(total_seconds).ok_or_else(|| PipelineError::Config {
        message: format!("TZ {spec:?} offset is out of range"),
    })
}

/// Runs the scheduling loop until `shutdown` flips to `true`: polls every
/// `poll_interval`, firing `run_once` when [`SchedulePolicy::due`] says so
/// and marking the date fired *before* awaiting the run, so a run that
/// spans a minute boundary can't double-fire. `RUN_ON_STARTUP` fires once
/// immediately, ignoring `boot_already_fired` bookkeeping.
pub async fn run<F, Fut>(policy: SchedulePolicy, mut run_once: F, mut shutdown: tokio::sync::watch::Receiver<bool>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_fired = policy.boot_already_fired(Utc::now());

    if policy.run_on_startup() {
        log::info!("schedule_policy: RUN_ON_STARTUP set, firing immediately");
        run_once().await;
        last_fired = Some(Utc::now().with_timezone(&policy.tz).date_naive());
    }

    loop {
        if *shutdown.borrow() {
            return;
        }

        if policy.due(Utc::now(), last_fired) {
            let (today, _) = policy.local_date_and_due(Utc::now());
            last_fired = Some(today);
            log::info!("schedule_policy: firing scheduled pipeline run for {today}");
            run_once().await;
        }

        tokio::select! {
            () = tokio::time::sleep(policy.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn policy(hour: u32, minute: u32, days: &[u8]) -> SchedulePolicy {
        SchedulePolicy {
            hour,
            minute,
            days: days.iter().copied().collect(),
            tz: Utc.fix(),
            poll_interval: Duration::from_secs(5),
            run_on_startup: false,
            catchup_on_boot: false,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn not_due_before_schedule_time() {
        let p = policy(8, 0, &[1, 2, 3, 4, 5]);
        // 2026-07-27 is a Monday.
        assert!(!p.due(at(2026, 7, 27, 7, 59), None));
    }

    #[test]
    fn due_once_schedule_time_is_reached_on_allowed_day() {
        let p = policy(8, 0, &[1, 2, 3, 4, 5]);
        assert!(p.due(at(2026, 7, 27, 8, 0), None));
    }

    #[test]
    fn not_due_again_same_local_day() {
        let p = policy(8, 0, &[1, 2, 3, 4, 5]);
        let now = at(2026, 7, 27, 9, 30);
        assert!(!p.due(now, Some(now.date_naive())));
    }

    #[test]
    fn disallowed_weekday_is_never_due() {
        let p = policy(8, 0, &[1, 2, 3, 4, 5]);
        // 2026-08-01 is a Saturday.
        assert!(!p.due(at(2026, 8, 1, 9, 0), None));
    }

    #[test]
    fn boot_after_schedule_time_marks_today_fired_without_catchup() {
        let p = policy(8, 0, &[1, 2, 3, 4, 5]);
        let boot = at(2026, 7, 27, 9, 0);
        assert_eq!(p.boot_already_fired(boot), Some(boot.date_naive()));
    }

    #[test]
    fn boot_before_schedule_time_does_not_mark_fired() {
        let p = policy(8, 0, &[1, 2, 3, 4, 5]);
        let boot = at(2026, 7, 27, 6, 0);
        assert_eq!(p.boot_already_fired(boot), None);
    }

    #[test]
    fn catchup_enabled_never_marks_boot_fired() {
        let mut p = policy(8, 0, &[1, 2, 3, 4, 5]);
        p.catchup_on_boot = true;
        let boot = at(2026, 7, 27, 9, 0);
        assert_eq!(p.boot_already_fired(boot), None);
    }

    #[test]
    fn parses_hh_mm() {
        assert_eq!(parse_schedule_time("08:00").unwrap(), (8, 0));
        assert_eq!(parse_schedule_time("23:59").unwrap(), (23, 59));
        assert!(parse_schedule_time("24:00").is_err());
        assert!(parse_schedule_time("nonsense").is_err());
    }

    #[test]
    fn parses_utc_and_fixed_offsets() {
        assert_eq!(parse_tz_offset("UTC").unwrap(), Utc.fix());
        assert_eq!(parse_tz_offset("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_tz_offset("-05:00").unwrap().local_minus_utc(), -18000);
        assert!(parse_tz_offset("America/New_York").is_err());
    }
}
