//! Five-field cron expressions for schedule triggers
//!
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-6, 0 = Sunday)
//! * * * * *
//! ```
//!
//! Supports `*`, single values, ranges (`9-17`), steps (`*/5`, `0-30/10`)
//! and comma lists.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    values: BTreeSet<u32>,
}

impl FieldSet {
    fn parse(spec: &str, min: u32, max: u32) -> Result<Self> {
        let mut values = BTreeSet::new();
        for part in spec.split(',') {
            let part = part.trim();
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| {
                        EngineError::InvalidInput(format!("invalid cron step {step:?}"))
                    })?;
                    if step == 0 {
                        return Err(EngineError::InvalidInput("cron step must be > 0".into()));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                let lo: u32 = lo.parse().map_err(|_| {
                    EngineError::InvalidInput(format!("invalid cron range start {lo:?}"))
                })?;
                let hi: u32 = hi.parse().map_err(|_| {
                    EngineError::InvalidInput(format!("invalid cron range end {hi:?}"))
                })?;
                if lo > hi {
                    return Err(EngineError::InvalidInput(format!(
                        "cron range {lo}-{hi} is inverted"
                    )));
                }
                (lo, hi)
            } else {
                let v: u32 = range.parse().map_err(|_| {
                    EngineError::InvalidInput(format!("invalid cron value {range:?}"))
                })?;
                (v, v)
            };

            if start < min || end > max {
                return Err(EngineError::InvalidInput(format!(
                    "cron value out of range [{min}, {max}]: {range}"
                )));
            }
            values.extend((start..=end).step_by(step as usize));
        }
        Ok(Self { values })
    }

    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed cron schedule
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(EngineError::InvalidInput(format!(
                "cron expression needs 5 fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            expression: expression.to_string(),
            minute: FieldSet::parse(fields[0], 0, 59)?,
            hour: FieldSet::parse(fields[1], 0, 23)?,
            day_of_month: FieldSet::parse(fields[2], 1, 31)?,
            month: FieldSet::parse(fields[3], 1, 12)?,
            day_of_week: FieldSet::parse(fields[4], 0, 6)?,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }

    /// Next matching minute strictly after `after`. Scans minute by minute
    /// with a four-year bound to cover leap-year edge cases.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + chrono::Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let limit = after + chrono::Duration::days(4 * 366);
        while candidate <= limit {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}
