// src/triggers/recurrence.rs

//! Recurrence rules and the pure `next_fire` computation.
//!
//! Two rule shapes are supported:
//!
//! | Rule       | Example           | Next fire after `t`                         |
//! |------------|-------------------|---------------------------------------------|
//! | `Interval` | `every 60s`       | `t + 60s`                                   |
//! | `Calendar` | `*/15 6-22 * * 1-5` | first whole minute `> t` matching all fields |
//!
//! Calendar fields are minute, hour, day-of-month, month and day-of-week, in
//! the grammar of the `cron` crate (`*`, `N`, `A-B`, `A,B`, `*/S`, `A-B/S`,
//! month and weekday names). Every field independently constrains a match:
//! day-of-month and day-of-week are ANDed. Day-of-week 0 and 7 are both Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::config::parse_duration;

/// Longest accepted interval.
const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    /// Fire every `every_secs` seconds, counted from the previous base time.
    Interval { every_secs: u64 },

    /// Cron-style calendar fields.
    Calendar {
        #[serde(default = "wildcard")]
        minute: String,
        #[serde(default = "wildcard")]
        hour: String,
        #[serde(default = "wildcard")]
        day_of_month: String,
        #[serde(default = "wildcard")]
        month: String,
        #[serde(default = "wildcard")]
        day_of_week: String,
    },
}

fn wildcard() -> String {
    "*".to_string()
}

impl Recurrence {
    pub fn every(secs: u64) -> Self {
        Recurrence::Interval { every_secs: secs }
    }

    /// Check the rule is well-formed and can fire at least once.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Recurrence::Interval { every_secs } => {
                if *every_secs == 0 {
                    return Err("interval must be at least 1s".to_string());
                }
                if *every_secs > MAX_INTERVAL_SECS {
                    return Err(format!("interval must be at most {MAX_INTERVAL_SECS}s"));
                }
                Ok(())
            }
            Recurrence::Calendar { .. } => {
                let spec = self.calendar_spec()?.ok_or("not a calendar rule")?;
                let reference = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
                let reference = reference.ok_or("invalid reference date")?;
                let utc = FixedOffset::east_opt(0).ok_or("invalid offset")?;
                if spec.next_after(reference, utc).is_none() {
                    return Err(format!("calendar rule '{self}' never matches"));
                }
                Ok(())
            }
        }
    }

    fn calendar_spec(&self) -> Result<Option<CalendarSpec>, String> {
        match self {
            Recurrence::Interval { .. } => Ok(None),
            Recurrence::Calendar {
                minute,
                hour,
                day_of_month,
                month,
                day_of_week,
            } => CalendarSpec::parse(minute, hour, day_of_month, month, day_of_week).map(Some),
        }
    }
}

/// Earliest fire instant strictly later than `after`.
///
/// Calendar fields are evaluated in `offset` local time. Returns `None` if
/// the rule is malformed or never matches again.
pub fn next_fire(
    rule: &Recurrence,
    after: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    match rule {
        Recurrence::Interval { every_secs } => {
            if *every_secs == 0 {
                return None;
            }
            let step = TimeDelta::try_seconds(i64::try_from(*every_secs).ok()?)?;
            after.checked_add_signed(step)
        }
        Recurrence::Calendar { .. } => {
            let spec = rule.calendar_spec().ok()??;
            spec.next_after(after, offset)
        }
    }
}

/// Parsed calendar fields backed by a `cron::Schedule` pinned to second 0.
#[derive(Debug, Clone)]
pub struct CalendarSpec {
    schedule: Schedule,
}

impl CalendarSpec {
    pub fn parse(
        minute: &str,
        hour: &str,
        day_of_month: &str,
        month: &str,
        day_of_week: &str,
    ) -> Result<Self, String> {
        for (name, expr) in [
            ("minute", minute),
            ("hour", hour),
            ("day_of_month", day_of_month),
            ("month", month),
            ("day_of_week", day_of_week),
        ] {
            check_field(name, expr)?;
        }
        let weekdays = weekday_field(day_of_week.trim())?;
        let expr = format!(
            "0 {} {} {} {} {weekdays}",
            minute.trim(),
            hour.trim(),
            day_of_month.trim(),
            month.trim()
        );
        let schedule = Schedule::from_str(&expr).map_err(|e| format!("invalid calendar rule: {e}"))?;
        Ok(Self { schedule })
    }

    /// First matching minute strictly after `after`, fields read in `offset`.
    pub fn next_after(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&offset))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Whether `local` (already in the rule's offset) satisfies every field.
    pub fn matches(&self, local: DateTime<FixedOffset>) -> bool {
        self.schedule.includes(local)
    }
}

/// Shape checks the cron grammar leaves to us: one token per field and no
/// zero steps.
fn check_field(name: &str, expr: &str) -> Result<(), String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(format!("{name}: empty field"));
    }
    if expr.contains(char::is_whitespace) {
        return Err(format!("{name}: unexpected whitespace in '{expr}'"));
    }
    for part in expr.split(',') {
        if let Some((_, step)) = part.split_once('/') {
            match step.parse::<u32>() {
                Ok(0) => return Err(format!("{name}: step must be >= 1 in '{part}'")),
                Ok(_) => {}
                Err(_) => return Err(format!("{name}: invalid step in '{part}'")),
            }
        }
    }
    Ok(())
}

/// Rewrite numeric day-of-week items (0-7, 0 and 7 both Sunday) as names,
/// since `cron` numbers weekdays from 1. Wildcards and names pass through.
fn weekday_field(expr: &str) -> Result<String, String> {
    let mut out: Vec<String> = Vec::new();
    for part in expr.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok()),
            None => (part, None),
        };
        let numeric = range
            .split('-')
            .all(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()));
        if range == "*" || !numeric {
            out.push(part.to_string());
            continue;
        }

        let (lo, hi) = match range.split_once('-') {
            Some((a, b)) => (weekday_number(a)?, weekday_number(b)?),
            None => {
                let v = weekday_number(range)?;
                if step.is_some() { (v, 7) } else { (v, v) }
            }
        };
        if lo > hi {
            return Err(format!("day_of_week: range start exceeds end in '{part}'"));
        }
        for v in (lo..=hi).step_by(step.unwrap_or(1).max(1)) {
            let name = WEEKDAY_NAMES[v].to_string();
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    Ok(out.join(","))
}

fn weekday_number(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(v) if v <= 7 => Ok(v),
        _ => Err(format!("day_of_week: '{s}' out of range 0-7")),
    }
}

impl FromStr for Recurrence {
    type Err = String;

    /// Accepts `every 60s`, `@every 5m`, `@hourly`, `@daily`, `@weekly`,
    /// `@monthly`, or five whitespace-separated calendar fields.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let expanded = match s {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other => other,
        };

        if let Some(rest) = expanded
            .strip_prefix("@every")
            .or_else(|| expanded.strip_prefix("every"))
        {
            let dur = parse_duration(rest)?;
            if dur.subsec_nanos() != 0 {
                return Err(format!("interval '{}' must be whole seconds", rest.trim()));
            }
            let rule = Recurrence::every(dur.as_secs());
            rule.validate()?;
            return Ok(rule);
        }

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
            return Err(format!(
                "expected 5 calendar fields or 'every <duration>', got '{s}'"
            ));
        };
        let rule = Recurrence::Calendar {
            minute: minute.to_string(),
            hour: hour.to_string(),
            day_of_month: day_of_month.to_string(),
            month: month.to_string(),
            day_of_week: day_of_week.to_string(),
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Interval { every_secs } => write!(f, "every {every_secs}s"),
            Recurrence::Calendar {
                minute,
                hour,
                day_of_month,
                month,
                day_of_week,
            } => write!(f, "{minute} {hour} {day_of_month} {month} {day_of_week}"),
        }
    }
}
