//! Fire-time computation.
//!
//! A [`Trigger`] answers one question: given a reference instant, when is the
//! next time a job should fire? [`CronTrigger`] answers it for a parsed
//! [`CronExpr`] evaluated in local civil time of a fixed timezone, so that
//! hour, day and month boundaries follow the wall clock rather than UTC.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;

use super::cron::{CronError, CronExpr};

/// How many years past the reference the search may look before giving up.
///
/// Eight years covers the longest gap between two February 29ths.
const SEARCH_HORIZON_YEARS: i32 = 8;

/// Computes fire instants for a job.
pub trait Trigger: fmt::Debug + Send + Sync {
    /// Smallest fire instant at or after `reference`, if any.
    fn next_from(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// Smallest fire instant strictly after `reference`, if any.
    fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let floor = reference.with_nanosecond(0)?;
        self.next_from(floor + TimeDelta::seconds(1))
    }

    /// Human-readable description of the rule.
    fn describe(&self) -> String;
}

/// A trigger driven by a cron expression in a fixed timezone.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: CronExpr,
    timezone: Tz,
}

/// Outcome of testing one local candidate time.
enum Seek {
    /// Every field matches.
    Match,
    /// The candidate cannot match; resume the search here.
    Skip(NaiveDateTime),
}

impl CronTrigger {
    /// Create a trigger from a parsed expression.
    pub fn new(expr: CronExpr, timezone: Tz) -> Self {
        Self { expr, timezone }
    }

    /// Parse an expression and bind it to a timezone.
    pub fn parse(expression: &str, timezone: Tz) -> Result<Self, CronError> {
        Ok(Self::new(CronExpr::parse(expression)?, timezone))
    }

    /// The parsed expression.
    pub fn expr(&self) -> &CronExpr {
        &self.expr
    }

    /// The timezone fields are evaluated in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Get the next `n` fire instants strictly after `reference`.
    ///
    /// Stops early when the expression has no further instants.
    pub fn next_n_after(&self, reference: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        std::iter::successors(self.next_after(reference), |prev| self.next_after(*prev))
            .take(n)
            .collect()
    }

    /// Test a local candidate, or find where the search should resume.
    fn seek(&self, t: NaiveDateTime) -> Option<Seek> {
        let expr = &self.expr;
        let date = t.date();

        if !expr.month().matches(t.month()) {
            let (year, month) = match expr.month().next(t.month()) {
                Some(month) => (t.year(), month),
                None => (t.year() + 1, expr.month().first()?),
            };
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            return Some(Seek::Skip(start.and_hms_opt(0, 0, 0)?));
        }

        if !expr.matches_day(date) {
            return Some(Seek::Skip(start_of_next_day(date)?));
        }

        if !expr.hour().matches(t.hour()) {
            return Some(Seek::Skip(match expr.hour().next(t.hour()) {
                Some(hour) => date.and_hms_opt(hour, 0, 0)?,
                None => start_of_next_day(date)?,
            }));
        }

        if !expr.minute().matches(t.minute()) {
            return Some(Seek::Skip(match expr.minute().next(t.minute()) {
                Some(minute) => date.and_hms_opt(t.hour(), minute, 0)?,
                None => date.and_hms_opt(t.hour(), 0, 0)? + TimeDelta::hours(1),
            }));
        }

        if !expr.second().matches(t.second()) {
            return Some(Seek::Skip(match expr.second().next(t.second()) {
                Some(second) => date.and_hms_opt(t.hour(), t.minute(), second)?,
                None => date.and_hms_opt(t.hour(), t.minute(), 0)? + TimeDelta::minutes(1),
            }));
        }

        Some(Seek::Match)
    }
}

impl Trigger for CronTrigger {
    fn next_from(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = ceil_to_second(reference)?;
        let mut local = start.with_timezone(&self.timezone).naive_local();
        let year_limit = local.year() + SEARCH_HORIZON_YEARS;

        while local.year() <= year_limit {
            match self.seek(local)? {
                Seek::Skip(next) => local = next,
                Seek::Match => {
                    let resolved = match self.timezone.from_local_datetime(&local) {
                        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                        LocalResult::Ambiguous(early, late) => {
                            let early = early.with_timezone(&Utc);
                            let late = late.with_timezone(&Utc);
                            if early >= start { Some(early) } else { Some(late) }
                        }
                        // Wall-clock time skipped by a DST transition.
                        LocalResult::None => None,
                    };

                    match resolved {
                        Some(instant) if instant >= start => return Some(instant),
                        _ => local += TimeDelta::seconds(1),
                    }
                }
            }
        }

        None
    }

    fn describe(&self) -> String {
        format!("cron[{}] ({})", self.expr, self.timezone)
    }
}

fn start_of_next_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.succ_opt()?.and_hms_opt(0, 0, 0)
}

fn ceil_to_second(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if t.nanosecond() == 0 {
        Some(t)
    } else {
        Some(t.with_nanosecond(0)? + TimeDelta::seconds(1))
    }
}
