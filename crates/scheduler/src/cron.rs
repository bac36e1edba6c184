//! Cron expression parsing for recurring job intervals.
//!
//! Supports standard 5-field expressions (`minute hour day-of-month month
//! day-of-week`) with `*`, `*/N` steps, `N-M` ranges, and `N,M` lists.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use ema_core::SchedulerError;

/// A parsed 5-field cron expression, one bitmask per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8, // bit 0 = Sunday
}

impl CronExpr {
    /// Parse a standard 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let fields: Vec<&str> = expr.trim().split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidInterval(format!(
                "expected 5 cron fields (minute hour dom month dow), got {}",
                fields.len()
            )));
        }

        Ok(CronExpr {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)? as u32,
            days_of_month: parse_field(fields[2], 1, 31)? as u32,
            months: parse_field(fields[3], 1, 12)? as u16,
            days_of_week: parse_field(fields[4], 0, 6)? as u8,
        })
    }

    /// Whether the given instant (truncated to the minute) matches.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes & (1u64 << dt.minute()) != 0
            && self.hours & (1u32 << dt.hour()) != 0
            && self.days_of_month & (1u32 << dt.day()) != 0
            && self.months & (1u16 << dt.month()) != 0
            && self.days_of_week & (1u8 << dt.weekday().num_days_from_sunday()) != 0
    }

    /// The first matching minute strictly after `after`, scanning at most a
    /// year ahead.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after)
            + Duration::minutes(1);
        for _ in 0..(60 * 24 * 366) {
            if self.matches(&t) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

/// Parse one cron field into a bitmask over `min..=max`.
fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, SchedulerError> {
    let invalid =
        |detail: String| SchedulerError::InvalidInterval(format!("cron field '{field}': {detail}"));

    let mut mask: u64 = 0;
    for part in field.split(',') {
        let part = part.trim();
        let (spec, step) = match part.split_once('/') {
            Some((spec, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{step}'")))?;
                if step == 0 {
                    return Err(invalid("step cannot be zero".into()));
                }
                (spec, step)
            }
            None => (part, 1),
        };

        let (start, end) = if spec == "*" {
            (min, max)
        } else if let Some((a, b)) = spec.split_once('-') {
            let start: u32 = a.parse().map_err(|_| invalid(format!("bad number '{a}'")))?;
            let end: u32 = b.parse().map_err(|_| invalid(format!("bad number '{b}'")))?;
            if start > end {
                return Err(invalid(format!("range {start}-{end} is inverted")));
            }
            (start, end)
        } else {
            let v: u32 = spec
                .parse()
                .map_err(|_| invalid(format!("bad number '{spec}'")))?;
            // A literal with a step extends to the field maximum
            if step > 1 {
                (v, max)
            } else {
                (v, v)
            }
        };

        if start < min || end > max {
            return Err(invalid(format!("{start}-{end} out of range {min}-{max}")));
        }

        let mut v = start;
        while v <= end {
            mask |= 1 << v;
            v += step;
        }
    }

    if mask == 0 {
        return Err(invalid("no values".into()));
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn every_minute_matches_everything() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 2, 0, 0)));
        assert!(expr.matches(&at(2026, 8, 2, 23, 59)));
    }

    #[test]
    fn specific_time_on_weekdays() {
        // At 09:30 on weekdays
        let expr = CronExpr::parse("30 9 * * 1-5").unwrap();

        // 2026-02-23 is a Monday
        assert!(expr.matches(&at(2026, 2, 23, 9, 30)));
        // 2026-02-22 is a Sunday
        assert!(!expr.matches(&at(2026, 2, 22, 9, 30)));
        assert!(!expr.matches(&at(2026, 2, 23, 9, 31)));
    }

    #[test]
    fn step_expression() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 2, 3, 0)));
        assert!(expr.matches(&at(2026, 8, 2, 3, 45)));
        assert!(!expr.matches(&at(2026, 8, 2, 3, 50)));
    }

    #[test]
    fn list_expression() {
        let expr = CronExpr::parse("0,30 * * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 2, 3, 30)));
        assert!(!expr.matches(&at(2026, 8, 2, 3, 15)));
    }

    #[test]
    fn next_after_finds_following_match() {
        let expr = CronExpr::parse("*/10 * * * *").unwrap();
        let next = expr.next_after(at(2026, 8, 2, 3, 5)).unwrap();
        assert_eq!(next, at(2026, 8, 2, 3, 10));
    }

    #[test]
    fn next_after_is_strictly_later() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let now = at(2026, 8, 2, 3, 5);
        assert_eq!(expr.next_after(now).unwrap(), at(2026, 8, 2, 3, 6));
    }

    #[test]
    fn next_after_crosses_day_boundary() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let next = expr.next_after(at(2026, 8, 2, 10, 0)).unwrap();
        assert_eq!(next, at(2026, 8, 3, 9, 0));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("* * *").is_err());
        assert!(CronExpr::parse("not a cron").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("* 25 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
    }

    #[test]
    fn rejects_zero_step() {
        assert!(CronExpr::parse("*/0 * * * *").is_err());
    }
}
