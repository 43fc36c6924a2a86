//! Cron expression parsing.
//!
//! Two layouts are accepted:
//! ```text
//! ┌───────────── second (0-59)        (6-field layout only)
//! │ ┌───────────── minute (0-59)
//! │ │ ┌───────────── hour (0-23)
//! │ │ │ ┌───────────── day of month (1-31)
//! │ │ │ │ ┌───────────── month (1-12 or jan-dec)
//! │ │ │ │ │ ┌───────────── day of week (0-7 or sun-sat, 0 and 7 = Sunday)
//! │ │ │ │ │ │
//! * * * * * *
//! ```
//! The 5-field layout omits the second, which is then fixed to 0.
//!
//! Each field accepts `*`, a number, a list `a,b`, a range `a-b` and a step
//! (`*/n`, `a/n`, `a-b/n`). The day fields additionally accept `?` as a
//! wildcard.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Errors that can occur when parsing cron expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 or 6 fields, got {0}")]
    InvalidFieldCount(usize),

    #[error("invalid {field} field '{expr}': {reason}")]
    InvalidField {
        field: FieldKind,
        expr: String,
        reason: String,
    },

    #[error("value {value} is out of range [{min}, {max}] for {field}")]
    OutOfRange {
        field: FieldKind,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid range {start}-{end} for {field}")]
    InvalidRange { field: FieldKind, start: u32, end: u32 },

    #[error("invalid step '{step}' for {field}")]
    InvalidStep { field: FieldKind, step: String },
}

/// Position of a field within a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    /// Inclusive bounds of the values this field accepts.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Second | FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 7),
        }
    }

    fn accepts_question_mark(self) -> bool {
        matches!(self, FieldKind::DayOfMonth | FieldKind::DayOfWeek)
    }

    fn name_value(self, token: &str) -> Option<u32> {
        let names: &[&str] = match self {
            FieldKind::Month => &MONTH_NAMES,
            FieldKind::DayOfWeek => &WEEKDAY_NAMES,
            _ => return None,
        };
        let lower = token.to_ascii_lowercase();
        let index = names.iter().position(|name| *name == lower)? as u32;
        Some(if self == FieldKind::Month { index + 1 } else { index })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Second => "second",
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        };
        f.write_str(name)
    }
}

/// A single field in a cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    kind: FieldKind,
    values: BTreeSet<u32>,
    wildcard: bool,
}

impl CronField {
    /// Parse a field expression.
    pub fn parse(kind: FieldKind, expr: &str) -> Result<Self, CronError> {
        let mut field = Self {
            kind,
            values: BTreeSet::new(),
            wildcard: expr == "*" || (expr == "?" && kind.accepts_question_mark()),
        };

        for part in expr.split(',') {
            field.parse_part(part)?;
        }

        // Sunday may be written as 7.
        if kind == FieldKind::DayOfWeek && field.values.remove(&7) {
            field.values.insert(0);
        }

        Ok(field)
    }

    /// Parse a single list item.
    fn parse_part(&mut self, part: &str) -> Result<(), CronError> {
        if part.is_empty() {
            return Err(self.invalid(part, "empty list item"));
        }

        let (min, max) = self.kind.bounds();

        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(self.parse_step(step)?)),
            None => (part, None),
        };

        let (start, end) = if range_part == "*"
            || (range_part == "?" && self.kind.accepts_question_mark())
        {
            (min, max)
        } else if let Some((start, end)) = range_part.split_once('-') {
            let start = self.parse_value(start)?;
            let end = self.parse_value(end)?;
            if start > end {
                return Err(CronError::InvalidRange {
                    field: self.kind,
                    start,
                    end,
                });
            }
            (start, end)
        } else {
            let value = self.parse_value(range_part)?;
            // `a/n` runs from a to the end of the field.
            if step.is_some() { (value, max) } else { (value, value) }
        };

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            self.values.insert(value);
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }

        Ok(())
    }

    fn parse_step(&self, step: &str) -> Result<u32, CronError> {
        match step.parse::<u32>() {
            Ok(step) if step > 0 => Ok(step),
            _ => Err(CronError::InvalidStep {
                field: self.kind,
                step: step.to_string(),
            }),
        }
    }

    fn parse_value(&self, token: &str) -> Result<u32, CronError> {
        let value = match token.parse::<u32>() {
            Ok(value) => value,
            Err(_) => self
                .kind
                .name_value(token)
                .ok_or_else(|| self.invalid(token, "not a number"))?,
        };

        let (min, max) = self.kind.bounds();
        if value < min || value > max {
            return Err(CronError::OutOfRange {
                field: self.kind,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }

    fn invalid(&self, expr: &str, reason: &str) -> CronError {
        CronError::InvalidField {
            field: self.kind,
            expr: expr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Which field this is.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Whether the field was written as a bare wildcard (`*` or `?`).
    ///
    /// Only a bare wildcard counts: `*/2` restricts the field.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Check if a value matches this field.
    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    /// Get the smallest matching value >= `value`.
    pub fn next(&self, value: u32) -> Option<u32> {
        self.values.range(value..).next().copied()
    }

    /// Get the first matching value.
    pub fn first(&self) -> Option<u32> {
        self.values.first().copied()
    }

    /// Iterate over the matching values in ascending order.
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.iter().copied()
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    expression: String,
    second: CronField,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// Parse a 5-field or 6-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();

        let (second, rest) = match fields.len() {
            6 => (CronField::parse(FieldKind::Second, fields[0])?, &fields[1..]),
            5 => (CronField::parse(FieldKind::Second, "0")?, &fields[..]),
            n => return Err(CronError::InvalidFieldCount(n)),
        };

        Ok(Self {
            expression: trimmed.to_string(),
            second,
            minute: CronField::parse(FieldKind::Minute, rest[0])?,
            hour: CronField::parse(FieldKind::Hour, rest[1])?,
            day_of_month: CronField::parse(FieldKind::DayOfMonth, rest[2])?,
            month: CronField::parse(FieldKind::Month, rest[3])?,
            day_of_week: CronField::parse(FieldKind::DayOfWeek, rest[4])?,
        })
    }

    /// The expression text as given (trimmed).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn second(&self) -> &CronField {
        &self.second
    }

    pub fn minute(&self) -> &CronField {
        &self.minute
    }

    pub fn hour(&self) -> &CronField {
        &self.hour
    }

    pub fn day_of_month(&self) -> &CronField {
        &self.day_of_month
    }

    pub fn month(&self) -> &CronField {
        &self.month
    }

    pub fn day_of_week(&self) -> &CronField {
        &self.day_of_week
    }

    /// Check whether a calendar day qualifies.
    ///
    /// When both day-of-month and day-of-week are restricted, a day matching
    /// either one qualifies. Otherwise the restricted field (if any) decides.
    pub fn matches_day(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }

        let dom = self.day_of_month.matches(date.day());
        let dow = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday());

        match (
            self.day_of_month.is_wildcard(),
            self.day_of_week.is_wildcard(),
        ) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }

    /// Check if a local wall-clock time matches every field.
    pub fn matches(&self, local: &NaiveDateTime) -> bool {
        self.matches_day(local.date())
            && self.hour.matches(local.hour())
            && self.minute.matches(local.minute())
            && self.second.matches(local.second())
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
