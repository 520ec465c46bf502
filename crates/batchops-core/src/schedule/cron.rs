//! 5-field cron expression parser and evaluator
//!
//! Fields: minute hour day-of-month month day-of-week, with `*`, comma
//! lists, ranges (`-`) and steps (`/`). Day-of-week runs 0-6 with
//! 0=Sunday (7 is accepted as an alias for Sunday). Evaluation is UTC
//! only; the reference zone is fixed at process start and stored
//! timestamps never carry a local offset.
//!
//! Day matching follows the classic rule: when both day-of-month and
//! day-of-week are restricted, a day matches if either field matches.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// Malformed schedule error
#[derive(Debug, Clone, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl From<CronError> for crate::Error {
    fn from(err: CronError) -> Self {
        crate::Error::Schedule(err.to_string())
    }
}

/// Bound on the forward search. A 5-field expression that cannot fire
/// within four years (Feb 29 under a restricted weekday, say) is reported
/// as never firing.
const SEARCH_HORIZON_DAYS: i64 = 4 * 366;

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u32,
    dom: u32,
    months: u16,
    dow: u8,
    dom_restricted: bool,
    dow_restricted: bool,
    expr: String,
}

impl CronSchedule {
    /// Parse a 5-field cron expression; rejects any unparseable field
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let minutes = parse_field(fields[0], 0, 59, "minute")?;
        let hours = parse_field(fields[1], 0, 23, "hour")? as u32;
        let dom = parse_field(fields[2], 1, 31, "day-of-month")? as u32;
        let months = parse_field(fields[3], 1, 12, "month")? as u16;
        let dow = parse_dow(fields[4])?;

        Ok(Self {
            minutes,
            hours,
            dom,
            months,
            dow,
            // A field beginning with '*' (including */n) counts as
            // unrestricted for the dom/dow combination rule
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
            expr: expr.to_string(),
        })
    }

    /// The original expression text
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Smallest instant strictly after `after` matching the expression,
    /// or None when nothing matches within the search horizon
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // First candidate: the next whole minute
        let start = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .map(|t| t + Duration::minutes(1))?;

        let mut date = start.date_naive();
        let horizon = date + Duration::days(SEARCH_HORIZON_DAYS);

        while date <= horizon {
            if !self.month_matches(date.month()) {
                // Jump to the first day of the next month
                date = first_of_next_month(date);
                continue;
            }

            if self.day_matches(date) {
                let (from_hour, from_minute) = if date == start.date_naive() {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };

                if let Some((hour, minute)) = self.first_time_at_or_after(from_hour, from_minute) {
                    let naive = date.and_hms_opt(hour, minute, 0)?;
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }

            date += Duration::days(1);
        }

        None
    }

    fn month_matches(&self, month: u32) -> bool {
        self.months & (1 << month) != 0
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_match = self.dom & (1 << date.day()) != 0;
        let dow_match = self.dow & (1 << date.weekday().num_days_from_sunday()) != 0;

        if self.dom_restricted && self.dow_restricted {
            dom_match || dow_match
        } else {
            dom_match && dow_match
        }
    }

    /// First (hour, minute) at or after the given time-of-day matching the
    /// hour and minute sets
    fn first_time_at_or_after(&self, from_hour: u32, from_minute: u32) -> Option<(u32, u32)> {
        for hour in from_hour..24 {
            if self.hours & (1 << hour) == 0 {
                continue;
            }
            let minute_floor = if hour == from_hour { from_minute } else { 0 };
            for minute in minute_floor..60 {
                if self.minutes & (1 << minute) != 0 {
                    return Some((hour, minute));
                }
            }
        }
        None
    }
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // Day 1 always exists
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

/// Parse one field into a bitmask over [min, max]
fn parse_field(spec: &str, min: u32, max: u32, field: &'static str) -> Result<u64, CronError> {
    let err = |reason: String| CronError::Field {
        field,
        value: spec.to_string(),
        reason,
    };

    let mut bits: u64 = 0;

    for term in spec.split(',') {
        if term.is_empty() {
            return Err(err("empty list element".to_string()));
        }

        let (body, step) = match term.split_once('/') {
            Some((body, step_str)) => {
                let step: u32 = step_str
                    .parse()
                    .map_err(|_| err(format!("invalid step '{}'", step_str)))?;
                if step == 0 {
                    return Err(err("step must be >= 1".to_string()));
                }
                (body, step)
            }
            None => (term, 1),
        };

        let (lo, hi) = if body == "*" {
            (min, max)
        } else if let Some((lo_str, hi_str)) = body.split_once('-') {
            let lo: u32 = lo_str
                .parse()
                .map_err(|_| err(format!("invalid range start '{}'", lo_str)))?;
            let hi: u32 = hi_str
                .parse()
                .map_err(|_| err(format!("invalid range end '{}'", hi_str)))?;
            (lo, hi)
        } else {
            let n: u32 = body
                .parse()
                .map_err(|_| err(format!("invalid value '{}'", body)))?;
            // N/step means N through the field maximum, classic semantics
            if term.contains('/') {
                (n, max)
            } else {
                (n, n)
            }
        };

        if lo < min || hi > max {
            return Err(err(format!(
                "value out of range, expected {}-{}",
                min, max
            )));
        }
        if lo > hi {
            return Err(err(format!("descending range {}-{}", lo, hi)));
        }

        let mut v = lo;
        while v <= hi {
            bits |= 1 << v;
            v += step;
        }
    }

    if bits == 0 {
        return Err(err("matches nothing".to_string()));
    }

    Ok(bits)
}

/// Day-of-week with 7 accepted as Sunday
fn parse_dow(spec: &str) -> Result<u8, CronError> {
    // Parse over 0-7, then fold 7 into bit 0
    let bits = parse_field(spec, 0, 7, "day-of-week")? as u16;
    let mut folded = (bits & 0x7f) as u8;
    if bits & (1 << 7) != 0 {
        folded |= 1;
    }
    Ok(folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, from: DateTime<Utc>) -> DateTime<Utc> {
        CronSchedule::parse(expr).unwrap().next_fire_after(from).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        assert_eq!(next("*/5 * * * *", at(2024, 3, 1, 12, 3)), at(2024, 3, 1, 12, 5));
        // Strictly after: an exact match does not fire again
        assert_eq!(next("*/5 * * * *", at(2024, 3, 1, 12, 5)), at(2024, 3, 1, 12, 10));
    }

    #[test]
    fn test_daily_at_two() {
        assert_eq!(next("0 2 * * *", at(2024, 3, 1, 2, 30)), at(2024, 3, 2, 2, 0));
        assert_eq!(next("0 2 * * *", at(2024, 3, 1, 1, 59)), at(2024, 3, 1, 2, 0));
    }

    #[test]
    fn test_monthly_first_day() {
        assert_eq!(next("30 4 1 * *", at(2024, 1, 15, 0, 0)), at(2024, 2, 1, 4, 30));
    }

    #[test]
    fn test_lists_and_ranges() {
        assert_eq!(next("0 9-17 * * *", at(2024, 3, 1, 17, 30)), at(2024, 3, 2, 9, 0));
        assert_eq!(next("15,45 8 * * *", at(2024, 3, 1, 8, 20)), at(2024, 3, 1, 8, 45));
    }

    #[test]
    fn test_weekday_zero_is_sunday() {
        // 2024-03-03 is a Sunday
        assert_eq!(next("0 12 * * 0", at(2024, 3, 1, 0, 0)), at(2024, 3, 3, 12, 0));
        // 7 aliases Sunday
        assert_eq!(next("0 12 * * 7", at(2024, 3, 1, 0, 0)), at(2024, 3, 3, 12, 0));
    }

    #[test]
    fn test_dom_dow_either_matches_when_both_restricted() {
        // 13th or Friday: from the 9th (Saturday), Friday the 15th comes
        // after the 13th (Wednesday), so the 13th wins
        assert_eq!(next("0 0 13 * 5", at(2024, 3, 9, 0, 0)), at(2024, 3, 13, 0, 0));
        // From the 13th, the next match is Friday the 15th
        assert_eq!(next("0 0 13 * 5", at(2024, 3, 13, 0, 0)), at(2024, 3, 15, 0, 0));
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(next("0 0 29 2 *", at(2023, 3, 1, 0, 0)), at(2024, 2, 29, 0, 0));
    }

    #[test]
    fn test_step_from_value() {
        // 10/15 in the minute field means 10,25,40,55
        assert_eq!(next("10/15 * * * *", at(2024, 3, 1, 12, 26)), at(2024, 3, 1, 12, 40));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("* * * * * *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-2 * * * *").is_err());
        assert!(CronSchedule::parse("a * * * *").is_err());
        assert!(CronSchedule::parse("1,,2 * * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_never_firing_returns_none() {
        // April 31st does not exist
        let schedule = CronSchedule::parse("0 0 31 4 *").unwrap();
        assert!(schedule.next_fire_after(at(2024, 1, 1, 0, 0)).is_none());
    }
}
