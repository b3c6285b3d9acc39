use super::DatePattern;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Rotation granularity of a rolling store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RotationPeriod {
    Second,
    Minute,
    Hour,
    HalfDay,
    Day,
    Week,
    Month,
}

impl RotationPeriod {
    pub const ALL: [RotationPeriod; 7] = [
        RotationPeriod::Second,
        RotationPeriod::Minute,
        RotationPeriod::Hour,
        RotationPeriod::HalfDay,
        RotationPeriod::Day,
        RotationPeriod::Week,
        RotationPeriod::Month,
    ];

    /// The shortest period whose boundary changes the formatted suffix.
    ///
    /// Formats the Unix epoch and the first boundary after it for each
    /// candidate in increasing order. `None` means the pattern never changes
    /// and the store never rotates.
    pub fn probe(pattern: &DatePattern) -> Option<Self> {
        let epoch = midnight(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default());
        let base = pattern.format(&epoch);
        Self::ALL
            .into_iter()
            .find(|period| pattern.format(&period.next_boundary(epoch)) != base)
    }

    /// First boundary strictly after `now`. Weeks start on Monday.
    pub fn next_boundary(&self, now: NaiveDateTime) -> NaiveDateTime {
        let date = now.date();
        match self {
            RotationPeriod::Second => truncate(now, 1) + chrono::Duration::seconds(1),
            RotationPeriod::Minute => truncate(now, 60) + chrono::Duration::minutes(1),
            RotationPeriod::Hour => truncate(now, 3600) + chrono::Duration::hours(1),
            RotationPeriod::HalfDay => {
                if now.hour() < 12 {
                    date.and_time(NaiveTime::MIN) + chrono::Duration::hours(12)
                } else {
                    midnight(next_day(date))
                }
            }
            RotationPeriod::Day => midnight(next_day(date)),
            RotationPeriod::Week => {
                let days = 7 - u64::from(date.weekday().num_days_from_monday());
                midnight(date.checked_add_days(Days::new(days)).unwrap_or(date))
            }
            RotationPeriod::Month => {
                let first = date.with_day(1).unwrap_or(date);
                midnight(first.checked_add_months(Months::new(1)).unwrap_or(first))
            }
        }
    }
}

fn truncate(now: NaiveDateTime, unit_secs: i64) -> NaiveDateTime {
    let secs = now.and_utc().timestamp();
    let floor = secs - secs.rem_euclid(unit_secs);
    DateTime::from_timestamp(floor, 0)
        .map(|t| t.naive_utc())
        .unwrap_or(now)
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn probe(pattern: &str) -> Option<RotationPeriod> {
        RotationPeriod::probe(&DatePattern::parse(pattern).unwrap())
    }

    #[test]
    fn test_probe_every_period() {
        assert_eq!(probe("'.'yyyy-MM-dd_HH-mm-ss"), Some(RotationPeriod::Second));
        assert_eq!(probe("'.'yyyy-MM-dd_HH-mm"), Some(RotationPeriod::Minute));
        assert_eq!(probe("'.'yyyy-MM-dd_HH"), Some(RotationPeriod::Hour));
        assert_eq!(probe("'.'yyyy-MM-dd_a"), Some(RotationPeriod::HalfDay));
        assert_eq!(probe("'.'yyyy-MM-dd"), Some(RotationPeriod::Day));
        assert_eq!(probe("'.'yyyy-ww"), Some(RotationPeriod::Week));
        assert_eq!(probe("'.'yyyy-MM"), Some(RotationPeriod::Month));
        assert_eq!(probe("'.log'"), None);
    }

    #[test]
    fn test_next_boundary() {
        let t = at(2024, 2, 29, 13, 45, 10);
        assert_eq!(RotationPeriod::Second.next_boundary(t), at(2024, 2, 29, 13, 45, 11));
        assert_eq!(RotationPeriod::Minute.next_boundary(t), at(2024, 2, 29, 13, 46, 0));
        assert_eq!(RotationPeriod::Hour.next_boundary(t), at(2024, 2, 29, 14, 0, 0));
        assert_eq!(RotationPeriod::HalfDay.next_boundary(t), at(2024, 3, 1, 0, 0, 0));
        assert_eq!(
            RotationPeriod::HalfDay.next_boundary(at(2024, 2, 29, 9, 0, 0)),
            at(2024, 2, 29, 12, 0, 0)
        );
        assert_eq!(RotationPeriod::Day.next_boundary(t), at(2024, 3, 1, 0, 0, 0));
        // 2024-02-29 is a Thursday
        assert_eq!(RotationPeriod::Week.next_boundary(t), at(2024, 3, 4, 0, 0, 0));
        assert_eq!(RotationPeriod::Month.next_boundary(t), at(2024, 3, 1, 0, 0, 0));
        assert_eq!(
            RotationPeriod::Month.next_boundary(at(2024, 12, 31, 23, 59, 59)),
            at(2025, 1, 1, 0, 0, 0)
        );
    }

    #[test]
    fn test_boundary_is_strictly_after() {
        let midnight = at(2024, 3, 4, 0, 0, 0);
        assert_eq!(RotationPeriod::Day.next_boundary(midnight), at(2024, 3, 5, 0, 0, 0));
        assert_eq!(RotationPeriod::Week.next_boundary(midnight), at(2024, 3, 11, 0, 0, 0));
    }
}
