//! Typed accessors for the pipeline's environment configuration.
//!
//! Every key is read fresh on each call rather than cached at startup, so
//! tests can set `std::env::set_var` per-case without a process restart.

use std::time::Duration;

const DEFAULT_LEADS_PER_DAY: i64 = 30;
const DEFAULT_FOLLOWUP_DAYS: i64 = 3;
const DEFAULT_APOLLO_OVERSAMPLE_FACTOR: i64 = 3;
const DEFAULT_AI_REQUEST_DELAY_SECONDS: f64 = 4.0;
const DEFAULT_WEBSITE_SCRAPE_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_WEBSITE_SCRAPE_DELAY_SECONDS: f64 = 1.0;
const MAX_CITIES_PER_RUN: u32 = 10;
const DEFAULT_SCHEDULE_TIME: &str = "08:00";
const DEFAULT_SCHEDULE_DAYS: &str = "1-5";
const DEFAULT_TZ: &str = "UTC";
const DEFAULT_SCHEDULER_POLL_SECONDS: u64 = 30;
const MIN_SCHEDULER_POLL_SECONDS: u64 = 5;

#[must_use]
pub fn leads_per_day() -> i64 {
    env_i64("LEADS_PER_DAY", DEFAULT_LEADS_PER_DAY).max(1)
}

#[must_use]
pub fn followup_days() -> i64 {
    env_i64("FOLLOWUP_DAYS", DEFAULT_FOLLOWUP_DAYS).max(0)
}

#[must_use]
pub fn apollo_oversample_factor() -> i64 {
    env_i64("APOLLO_PEOPLE_OVERSAMPLE_FACTOR", DEFAULT_APOLLO_OVERSAMPLE_FACTOR).clamp(1, 10)
}

#[must_use]
pub fn ai_request_delay() -> Duration {
    let secs = env_f64("AI_REQUEST_DELAY", DEFAULT_AI_REQUEST_DELAY_SECONDS).max(0.0);
    Duration::from_secs_f64(secs)
}

#[must_use]
pub fn website_scrape_timeout() -> Duration {
    Duration::from_secs(env_u64(
        "WEBSITE_SCRAPE_TIMEOUT",
        DEFAULT_WEBSITE_SCRAPE_TIMEOUT_SECONDS,
    ))
}

#[must_use]
pub fn website_scrape_delay() -> Duration {
    Duration::from_secs_f64(env_f64(
        "WEBSITE_SCRAPE_DELAY",
        DEFAULT_WEBSITE_SCRAPE_DELAY_SECONDS,
    ))
}

#[must_use]
pub const fn max_cities_per_run() -> u32 {
    MAX_CITIES_PER_RUN
}

/// Transport used for personalized outreach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutreachTransport {
    Gmass,
    Smtp,
}

#[must_use]
pub fn outreach_transport() -> OutreachTransport {
    match std::env::var("OUTREACH_TRANSPORT").as_deref() {
        Ok("gmass") => OutreachTransport::Gmass,
        _ => OutreachTransport::Smtp,
    }
}

#[must_use]
pub fn gmass_track_opens() -> bool {
    env_bool("GMASS_TRACK_OPENS", false)
}

#[must_use]
pub fn gmass_track_clicks() -> bool {
    env_bool("GMASS_TRACK_CLICKS", false)
}

#[must_use]
pub fn apollo_api_key() -> Option<String> {
    non_empty_env("APOLLO_API_KEY")
}

#[must_use]
pub fn serper_api_key() -> Option<String> {
    non_empty_env("SERPER_API_KEY")
}

#[must_use]
pub fn gmass_api_key() -> Option<String> {
    non_empty_env("GMASS_API_KEY")
}

#[must_use]
pub fn city_rotation_reset_to() -> Option<(String, Option<String>)> {
    let raw = non_empty_env("CITY_ROTATION_RESET_TO")?;
    match raw.split_once(',') {
        Some((city, country)) => Some((city.trim().to_string(), Some(country.trim().to_string()))),
        None => Some((raw.trim().to_string(), None)),
    }
}

/// `SCHEDULE_TIME_OVERRIDE`, falling back to `SCHEDULE_TIME`, falling back
/// to `08:00` — the wall-clock time of day the pipeline process's own
/// daily scheduling policy fires at (§4.E.6), distinct from the generic
/// scheduler crate's cron entries.
#[must_use]
pub fn schedule_time() -> String {
    non_empty_env("SCHEDULE_TIME_OVERRIDE")
        .or_else(|| non_empty_env("SCHEDULE_TIME"))
        .unwrap_or_else(|| DEFAULT_SCHEDULE_TIME.to_string())
}

#[must_use]
pub fn schedule_days() -> String {
    non_empty_env("SCHEDULE_DAYS").unwrap_or_else(|| DEFAULT_SCHEDULE_DAYS.to_string())
}

#[must_use]
pub fn timezone() -> String {
    non_empty_env("TZ").unwrap_or_else(|| DEFAULT_TZ.to_string())
}

/// How often the pipeline process's scheduling loop polls, floored at 5s.
#[must_use]
pub fn scheduler_poll_seconds() -> u64 {
    env_u64("SCHEDULER_POLL_SECONDS", DEFAULT_SCHEDULER_POLL_SECONDS).max(MIN_SCHEDULER_POLL_SECONDS)
}

#[must_use]
pub fn run_on_startup() -> bool {
    env_bool("RUN_ON_STARTUP", false)
}

#[must_use]
pub fn schedule_catchup_on_boot() -> bool {
    env_bool("SCHEDULE_CATCHUP_ON_BOOT", false)
}

/// Testing-only numeric overrides for the facade's synthesized snapshot.
#[must_use]
pub fn acem_metrics_mock() -> bool {
    env_bool("ACEM_METRICS_MOCK", false)
}

#[must_use]
pub fn acem_metrics_mock_runs_total() -> i64 {
    env_i64("ACEM_METRICS_MOCK_RUNS_TOTAL", 0)
}

#[must_use]
pub fn acem_metrics_mock_tasks_completed() -> i64 {
    env_i64("ACEM_METRICS_MOCK_TASKS_COMPLETED", 0)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apollo_oversample_factor_is_clamped_to_one_through_ten() {
        std::env::set_var("APOLLO_PEOPLE_OVERSAMPLE_FACTOR", "57");
        assert_eq!(apollo_oversample_factor(), 10);
        std::env::set_var("APOLLO_PEOPLE_OVERSAMPLE_FACTOR", "0");
        assert_eq!(apollo_oversample_factor(), 1);
        std::env::remove_var("APOLLO_PEOPLE_OVERSAMPLE_FACTOR");
    }

    #[test]
    fn city_rotation_reset_to_splits_city_and_country() {
        std::env::set_var("CITY_ROTATION_RESET_TO", "Lima, PE");
        assert_eq!(
            city_rotation_reset_to(),
            Some(("Lima".to_string(), Some("PE".to_string())))
        );
        std::env::set_var("CITY_ROTATION_RESET_TO", "Lima");
        assert_eq!(city_rotation_reset_to(), Some(("Lima".to_string(), None)));
        std::env::remove_var("CITY_ROTATION_RESET_TO");
    }

    #[test]
    fn scheduler_poll_seconds_is_floored_at_five() {
        std::env::set_var("SCHEDULER_POLL_SECONDS", "1");
        assert_eq!(scheduler_poll_seconds(), 5);
        std::env::set_var("SCHEDULER_POLL_SECONDS", "90");
        assert_eq!(scheduler_poll_seconds(), 90);
        std::env::remove_var("SCHEDULER_POLL_SECONDS");
    }

    #[test]
    fn schedule_time_override_wins_over_schedule_time() {
        std::env::set_var("SCHEDULE_TIME", "09:00");
        std::env::set_var("SCHEDULE_TIME_OVERRIDE", "10:30");
        assert_eq!(schedule_time(), "10:30");
        std::env::remove_var("SCHEDULE_TIME_OVERRIDE");
        assert_eq!(schedule_time(), "09:00");
        std::env::remove_var("SCHEDULE_TIME");
        assert_eq!(schedule_time(), "08:00");
    }
}
