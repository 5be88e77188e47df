//! Cron expression evaluation.
//!
//! Contract: `next_after(schedule, after, tz)` is the first trigger strictly
//! later than `after`, evaluated in the wall-clock time of `tz`.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::SchedulerError;

/// Parse a 5-field crontab or 6/7-field (seconds, optional year) expression.
pub fn parse_schedule(expression: &str) -> Result<Schedule, SchedulerError> {
    let normalized = normalize_expression(expression)?;
    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First trigger time strictly after `after`.
pub fn next_after(
    expression: &str,
    after: DateTime<Utc>,
    tz: Tz,
) -> Result<DateTime<Utc>, SchedulerError> {
    let schedule = parse_schedule(expression)?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| SchedulerError::NoUpcomingRun(expression.to_string()))
}

/// A job that never ran is due immediately; otherwise it is due once the
/// first trigger after its last run has been reached.
pub fn is_due(
    expression: &str,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<bool, SchedulerError> {
    match last_run {
        None => Ok(true),
        Some(last_run) => Ok(next_after(expression, last_run, tz)? <= now),
    }
}

fn normalize_expression(expression: &str) -> Result<String, SchedulerError> {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();

    match fields.len() {
        // standard crontab syntax: minute hour day month weekday
        5 => {
            let day_of_week = normalize_day_of_week(fields[4], expression)?;
            Ok(format!("0 {} {day_of_week}", fields[..4].join(" ")))
        }
        // crate-native syntax includes seconds (+ optional year)
        6 | 7 => Ok(expression.to_string()),
        n => Err(SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: format!("expected 5, 6, or 7 fields, got {n}"),
        }),
    }
}

/// Rewrite a crontab weekday field (0-7, Sunday is 0 or 7) into the `cron`
/// crate's numbering (1-7, Sunday is 1). Named days pass through unchanged.
fn normalize_day_of_week(field: &str, expression: &str) -> Result<String, SchedulerError> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let invalid = |reason: String| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason,
    };
    let parse_day = |raw: &str| {
        raw.parse::<u32>()
            .ok()
            .filter(|day| *day <= 7)
            .ok_or_else(|| invalid(format!("invalid day of week `{raw}`")))
    };

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (range, Some(step)),
                _ => return Err(invalid(format!("invalid day-of-week step `{step}`"))),
            },
            None => (item, None),
        };
        let (start, end) = match (range, range.split_once('-')) {
            ("*", _) => (0, 6),
            (_, Some((start, end))) => (parse_day(start)?, parse_day(end)?),
            // `n/step` runs from n to the end of the week
            (_, None) if step.is_some() => (parse_day(range)?, 6),
            (_, None) => {
                let day = parse_day(range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(invalid(format!("invalid day-of-week range `{range}`")));
        }
        days.extend((start..=end).step_by(step.unwrap_or(1)).map(|day| day % 7 + 1));
    }

    Ok(days
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(","))
}
