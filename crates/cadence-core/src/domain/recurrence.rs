//! Recurrence expressions (cron-like cadence of recurring tasks).
//!
//! Accepts the classic 5-field form (`min hour dom month dow`) and the
//! seconds-first 6/7-field form understood by the `cron` crate. 5-field
//! expressions are normalized by prepending a `0` seconds field.
//!
//! 5-field day-of-week numbers follow classic cron (0 or 7 = Sunday,
//! 1 = Monday). The `cron` crate counts from 1 = Sunday, so numeric days are
//! rewritten to names before parsing. 6/7-field expressions keep the crate's
//! numbering.
//!
//! This is the only recurrence calculator in the crate: the queue engine uses
//! it to compute fire times, the core only mirrors what the engine reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid recurrence expression '{expression}': {reason}")]
pub struct RecurrenceError {
    pub expression: String,
    pub reason: String,
}

/// A parsed, validated recurrence rule.
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    expression: String,
    schedule: Schedule,
}

impl RecurrenceRule {
    pub fn parse(expression: &str) -> Result<Self, RecurrenceError> {
        let trimmed = expression.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let dow = name_weekdays(fields[4]).map_err(|reason| RecurrenceError {
                    expression: expression.to_string(),
                    reason,
                })?;
                format!("0 {} {dow}", fields[..4].join(" "))
            }
            6 | 7 => fields.join(" "),
            n => {
                return Err(RecurrenceError {
                    expression: expression.to_string(),
                    reason: format!("expected 5 to 7 fields, got {n}"),
                });
            }
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| RecurrenceError {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as given by the client (trimmed, not normalized).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The next `count` fire times strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite a classic day-of-week field so numbers become day names.
///
/// Numeric ranges and steps are expanded into a list (`5-7` = `Fri,Sat,Sun`),
/// which also covers ranges that wrap past Saturday. Wildcards and parts that
/// already use names are left alone.
fn name_weekdays(field: &str) -> Result<String, String> {
    let mut days: Vec<&str> = Vec::new();
    let mut passthrough: Vec<&str> = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        if range == "*" || range == "?" || !range.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
            passthrough.push(part);
            continue;
        }

        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (weekday_number(start)?, weekday_number(end)?),
            None => {
                let start = weekday_number(range)?;
                (start, if step.is_some() { 7 } else { start })
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{range}' runs backwards"));
        }
        let step = match step {
            Some(step) => match step.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(format!("invalid day-of-week step '{step}'")),
            },
            None => 1,
        };

        for day in (start..=end).step_by(step) {
            let name = WEEKDAYS[day % 7];
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    let mut parts: Vec<&str> = passthrough;
    parts.extend(days);
    Ok(parts.join(","))
}

fn weekday_number(token: &str) -> Result<usize, String> {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(format!("day-of-week '{token}' must be within 0-7")),
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expression.fmt(f)
    }
}
