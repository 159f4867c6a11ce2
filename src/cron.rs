//! Restricted cron schedules for the job runner.
//!
//! Five whitespace-separated fields: minute, hour, day-of-month, month,
//! day-of-week. Day-of-month and month are locked to `*`; the remaining
//! fields accept `*`, single values, ranges, steps, and comma lists.
//! Evaluation is pure: `next_run` scans forward from an explicit instant,
//! minute by minute, in UTC.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::error::CronError;

/// One year of minutes (leap-ready). `next_run` gives up past this.
const SCAN_HORIZON_MINUTES: i64 = 366 * 24 * 60;

struct FieldSpec {
    name: &'static str,
    max: u32,
}

const MINUTE_FIELD: FieldSpec = FieldSpec {
    name: "minute",
    max: 59,
};
const HOUR_FIELD: FieldSpec = FieldSpec {
    name: "hour",
    max: 23,
};
// Day-of-week admits 0-7 on input; 7 folds to 0 (both mean Sunday).
const DOW_FIELD: FieldSpec = FieldSpec {
    name: "day-of-week",
    max: 7,
};

/// Allowed values for one field; `Any` is the bare `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldSet {
    Any,
    Values(BTreeSet<u32>),
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        match self {
            FieldSet::Any => true,
            FieldSet::Values(values) => values.contains(&value),
        }
    }
}

/// A parsed, validated schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: FieldSet,
    hours: FieldSet,
    weekdays: FieldSet,
    source: String,
}

impl CronSchedule {
    /// Parse and validate a five-field expression.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount {
                found: fields.len(),
            });
        }

        let minutes = parse_field(&MINUTE_FIELD, fields[0])?;
        let hours = parse_field(&HOUR_FIELD, fields[1])?;

        if fields[2] != "*" {
            return Err(CronError::WildcardOnly {
                field: "day-of-month",
                value: fields[2].to_string(),
            });
        }
        if fields[3] != "*" {
            return Err(CronError::WildcardOnly {
                field: "month",
                value: fields[3].to_string(),
            });
        }

        let weekdays = fold_sunday(parse_field(&DOW_FIELD, fields[4])?);

        Ok(Self {
            minutes,
            hours,
            weekdays,
            source: expr.trim().to_string(),
        })
    }

    /// Whether the schedule fires at the given instant (minute
    /// resolution; seconds are ignored).
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.weekdays.contains(at.weekday().num_days_from_sunday())
    }

    /// First firing instant strictly after `from`, to minute precision.
    ///
    /// The candidate scan starts at `from` plus one minute, truncated to
    /// the minute, so an instant exactly on a firing never returns
    /// itself.
    pub fn next_run(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let mut candidate = truncate_to_minute(from) + Duration::minutes(1);
        for _ in 0..SCAN_HORIZON_MINUTES {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        Err(CronError::Unsatisfiable)
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Validate without keeping the schedule; returns the specific defect.
pub fn validate(expr: &str) -> Result<(), CronError> {
    CronSchedule::parse(expr).map(|_| ())
}

fn parse_field(spec: &FieldSpec, raw: &str) -> Result<FieldSet, CronError> {
    if raw == "*" {
        return Ok(FieldSet::Any);
    }
    let mut values = BTreeSet::new();
    for token in raw.split(',') {
        parse_token(spec, token, &mut values)?;
    }
    Ok(FieldSet::Values(values))
}

fn parse_token(spec: &FieldSpec, token: &str, out: &mut BTreeSet<u32>) -> Result<(), CronError> {
    let malformed = || CronError::MalformedToken {
        field: spec.name,
        token: token.to_string(),
    };

    if token.is_empty() {
        return Err(malformed());
    }
    // At most one step and one range per token.
    if token.matches('/').count() > 1 || token.matches('-').count() > 1 {
        return Err(malformed());
    }

    let (base, step) = match token.split_once('/') {
        Some((base, step_str)) => {
            let step: u32 = step_str.parse().map_err(|_| malformed())?;
            if step == 0 {
                return Err(CronError::InvalidStep {
                    token: token.to_string(),
                });
            }
            (base, Some(step))
        }
        None => (token, None),
    };

    let (start, end) = if base == "*" {
        (0, spec.max)
    } else if let Some((lo, hi)) = base.split_once('-') {
        let lo: u32 = lo.parse().map_err(|_| malformed())?;
        let hi: u32 = hi.parse().map_err(|_| malformed())?;
        check_range(spec, lo)?;
        check_range(spec, hi)?;
        if lo > hi {
            return Err(CronError::InvalidRange {
                token: token.to_string(),
            });
        }
        (lo, hi)
    } else {
        let value: u32 = base.parse().map_err(|_| malformed())?;
        check_range(spec, value)?;
        match step {
            // `a/b` steps from a through the top of the field.
            Some(_) => (value, spec.max),
            None => (value, value),
        }
    };

    let step = step.unwrap_or(1);
    let mut value = start;
    loop {
        out.insert(value);
        match value.checked_add(step) {
            Some(next) if next <= end => value = next,
            _ => break,
        }
    }
    Ok(())
}

fn check_range(spec: &FieldSpec, value: u32) -> Result<(), CronError> {
    if value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            max: spec.max,
        });
    }
    Ok(())
}

/// Day-of-week 7 means Sunday, same as 0.
fn fold_sunday(set: FieldSet) -> FieldSet {
    match set {
        FieldSet::Any => FieldSet::Any,
        FieldSet::Values(values) => {
            FieldSet::Values(values.into_iter().map(|v| if v == 7 { 0 } else { v }).collect())
        }
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
        .single()
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().expect("test instant")
    }

    fn next(expr: &str, from: &str) -> DateTime<Utc> {
        CronSchedule::parse(expr)
            .expect("valid expression")
            .next_run(at(from))
            .expect("satisfiable")
    }

    // ── next_run behavior ────────────────────────────────────────────

    #[test]
    fn daily_nine_am_later_today() {
        assert_eq!(
            next("0 9 * * *", "2026-02-17T08:15:00Z"),
            at("2026-02-17T09:00:00Z")
        );
    }

    #[test]
    fn exact_firing_instant_rolls_to_next_day() {
        assert_eq!(
            next("0 9 * * *", "2026-02-17T09:00:00Z"),
            at("2026-02-18T09:00:00Z")
        );
    }

    #[test]
    fn seconds_are_truncated_before_the_scan() {
        assert_eq!(
            next("0 9 * * *", "2026-02-17T08:59:45Z"),
            at("2026-02-17T09:00:00Z")
        );
    }

    #[test]
    fn weekday_range_skips_the_weekend() {
        // 2026-02-20 is a Friday; 14:30 already passed, so the next
        // weekday firing is Monday.
        assert_eq!(
            next("30 14 * * 1-5", "2026-02-20T15:00:00Z"),
            at("2026-02-23T14:30:00Z")
        );
    }

    #[test]
    fn comma_lists_pick_the_nearest_combination() {
        assert_eq!(
            next("0,30 9,17 * * *", "2026-02-17T09:05:00Z"),
            at("2026-02-17T09:30:00Z")
        );
    }

    #[test]
    fn sunday_as_seven() {
        // 2026-02-18 is a Wednesday; the following Sunday is the 22nd.
        assert_eq!(
            next("0 10 * * 7", "2026-02-18T12:00:00Z"),
            at("2026-02-22T10:00:00Z")
        );
    }

    #[test]
    fn seven_and_zero_are_the_same_weekday() {
        let from = at("2026-02-18T12:00:00Z");
        assert_eq!(
            CronSchedule::parse("0 10 * * 7").unwrap().next_run(from).unwrap(),
            CronSchedule::parse("0 10 * * 0").unwrap().next_run(from).unwrap()
        );
    }

    #[test]
    fn wildcard_step_minutes() {
        assert_eq!(
            next("*/15 * * * *", "2026-02-17T10:07:00Z"),
            at("2026-02-17T10:15:00Z")
        );
    }

    #[test]
    fn range_with_step() {
        // 10-40/10 yields minutes 10, 20, 30, 40.
        assert_eq!(
            next("10-40/10 9 * * *", "2026-02-17T09:15:00Z"),
            at("2026-02-17T09:20:00Z")
        );
    }

    #[test]
    fn value_with_step_runs_to_field_max() {
        // 5/20 yields minutes 5, 25, 45.
        assert_eq!(
            next("5/20 * * * *", "2026-02-17T00:30:00Z"),
            at("2026-02-17T00:45:00Z")
        );
    }

    #[test]
    fn every_minute() {
        assert_eq!(
            next("* * * * *", "2026-02-17T10:07:30Z"),
            at("2026-02-17T10:08:00Z")
        );
    }

    // ── validation ───────────────────────────────────────────────────

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            validate("0 9 * *"),
            Err(CronError::FieldCount { found: 4 })
        ));
        assert!(matches!(
            validate("0 9 * * * *"),
            Err(CronError::FieldCount { found: 6 })
        ));
    }

    #[test]
    fn rejects_non_wildcard_day_of_month() {
        assert!(matches!(
            validate("0 9 1 * *"),
            Err(CronError::WildcardOnly {
                field: "day-of-month",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_wildcard_month() {
        assert!(matches!(
            validate("0 9 * 2 *"),
            Err(CronError::WildcardOnly { field: "month", .. })
        ));
    }

    #[test]
    fn rejects_zero_step() {
        assert!(matches!(
            validate("*/0 * * * *"),
            Err(CronError::InvalidStep { .. })
        ));
    }

    #[test]
    fn rejects_double_step_or_double_range() {
        assert!(matches!(
            validate("*/5/2 * * * *"),
            Err(CronError::MalformedToken { .. })
        ));
        assert!(matches!(
            validate("1-2-3 * * * *"),
            Err(CronError::MalformedToken { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            validate("60 * * * *"),
            Err(CronError::OutOfRange { field: "minute", .. })
        ));
        assert!(matches!(
            validate("* 24 * * *"),
            Err(CronError::OutOfRange { field: "hour", .. })
        ));
        assert!(matches!(
            validate("* * * * 8"),
            Err(CronError::OutOfRange {
                field: "day-of-week",
                ..
            })
        ));
    }

    #[test]
    fn rejects_backwards_range() {
        assert!(matches!(
            validate("30-10 * * * *"),
            Err(CronError::InvalidRange { .. })
        ));
    }

    #[test]
    fn rejects_empty_list_entries_and_garbage() {
        assert!(matches!(
            validate("1,,2 * * * *"),
            Err(CronError::MalformedToken { .. })
        ));
        assert!(matches!(
            validate("x * * * *"),
            Err(CronError::MalformedToken { .. })
        ));
        assert!(matches!(
            validate("-5 * * * *"),
            Err(CronError::MalformedToken { .. })
        ));
    }

    #[test]
    fn accepts_the_usual_shapes() {
        for expr in [
            "* * * * *",
            "0 9 * * *",
            "30 14 * * 1-5",
            "0,30 9,17 * * *",
            "*/10 8-18 * * 1,3,5",
            "0 10 * * 7",
        ] {
            assert!(validate(expr).is_ok(), "{expr} should parse");
        }
    }
}
