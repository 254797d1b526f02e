//! Parses an ISO-weekday range specification into the set of weekdays it
//! names.
//!
//! Accepts `*` (every day), a comma list (`1,3,5`), a range (`1-5`), or a
//! wrapping range (`5-1` meaning Friday, Saturday, Sunday, Monday) — and
//! any comma-separated mix of the three. Days are numbered 1 (Monday)
//! through 7 (Sunday), matching `chrono::Weekday::number_from_monday`.

use std::collections::BTreeSet;

use crate::SchedulerError;

/// Parses a day-range spec into the set of ISO weekdays (1-7) it selects.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidSchedule`] if the spec is empty, any
/// token isn't a valid day number in `1..=7`, or a range endpoint can't be
/// parsed as an integer.
pub fn parse_days(spec: &str) -> Result<BTreeSet<u8>, SchedulerError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(SchedulerError::InvalidSchedule {
            message: "day range spec is empty".to_string(),
        });
    }

    if spec == "*" {
        return Ok((1..=7).collect());
    }

    let mut days = BTreeSet::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(SchedulerError::InvalidSchedule {
                message: format!("empty token in day range spec {spec:?}"),
            });
        }

        if let Some((start, end)) = part.split_once('-') {
            let start = parse_day(start, spec)?;
            let end = parse_day(end, spec)?;
            if start <= end {
                days.extend(start..=end);
            } else {
                days.extend(start..=7);
                days.extend(1..=end);
            }
        } else {
            days.insert(parse_day(part, spec)?);
        }
    }

    Ok(days)
}

fn parse_day(token: &str, spec: &str) -> Result<u8, SchedulerError> {
    let day: u8 = token
        .trim()
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule {
            message: format!("invalid day token {token:?} in spec {spec:?}"),
        })?;
    if !(1..=7).contains(&day) {
        return Err(SchedulerError::InvalidSchedule {
            message: format!("day {day} out of range 1-7 in spec {spec:?}"),
        });
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_range() {
        assert_eq!(parse_days("1-5").unwrap(), BTreeSet::from([1, 2, 3, 4, 5]));
    }

    #[test]
    fn wrapping_range() {
        assert_eq!(parse_days("5-1").unwrap(), BTreeSet::from([5, 6, 7, 1]));
    }

    #[test]
    fn wildcard_is_every_day() {
        assert_eq!(parse_days("*").unwrap(), BTreeSet::from([1, 2, 3, 4, 5, 6, 7]));
    }

    #[test]
    fn comma_list() {
        assert_eq!(parse_days("1,3,5").unwrap(), BTreeSet::from([1, 3, 5]));
    }

    #[test]
    fn mixed_list_and_range() {
        assert_eq!(parse_days("1-2,6").unwrap(), BTreeSet::from([1, 2, 6]));
    }

    #[test]
    fn empty_spec_is_an_error() {
        assert!(parse_days("").is_err());
        assert!(parse_days("   ").is_err());
    }

    #[test]
    fn out_of_range_day_is_an_error() {
        assert!(parse_days("0-3").is_err());
        assert!(parse_days("8").is_err());
    }
}
