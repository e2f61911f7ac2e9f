//! Run cadences.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// How often a job is meant to run. Days are evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once per day.
    Daily,
    /// Once per week, on the given weekday.
    Weekly(Weekday),
    /// Once per month, on its last day.
    MonthlyLastDay,
}

impl Cadence {
    /// Storage key for this cadence. Weekly cadences on different days are
    /// tracked separately.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly(day) => match day {
                Weekday::Mon => "weekly-mon",
                Weekday::Tue => "weekly-tue",
                Weekday::Wed => "weekly-wed",
                Weekday::Thu => "weekly-thu",
                Weekday::Fri => "weekly-fri",
                Weekday::Sat => "weekly-sat",
                Weekday::Sun => "weekly-sun",
            },
            Self::MonthlyLastDay => "monthly",
        }
    }

    /// Returns true if `date` is a run day for this cadence.
    #[must_use]
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly(day) => date.weekday() == *day,
            Self::MonthlyLastDay => is_last_day_of_month(date),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weekly(day) => write!(f, "weekly ({day})"),
            _ => f.write_str(self.key()),
        }
    }
}

fn is_last_day_of_month(date: NaiveDate) -> bool {
    (date + Days::new(1)).day() == 1
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_runs_every_day() {
        assert!(Cadence::Daily.runs_on(date(2026, 10, 17)));
    }

    #[test]
    fn test_weekly_runs_on_its_day() {
        let cadence = Cadence::Weekly(Weekday::Mon);
        assert!(cadence.runs_on(date(2026, 10, 19)));
        assert!(!cadence.runs_on(date(2026, 10, 20)));
    }

    #[test]
    fn test_monthly_last_day() {
        let cadence = Cadence::MonthlyLastDay;
        assert!(cadence.runs_on(date(2026, 10, 31)));
        assert!(cadence.runs_on(date(2028, 2, 29)));
        assert!(!cadence.runs_on(date(2028, 2, 28)));
        assert!(cadence.runs_on(date(2027, 2, 28)));
        assert!(cadence.runs_on(date(2026, 12, 31)));
        assert!(!cadence.runs_on(date(2026, 10, 30)));
    }

    #[test]
    fn test_weekly_keys_differ_by_day() {
        assert_eq!(Cadence::Weekly(Weekday::Mon).key(), "weekly-mon");
        assert_ne!(
            Cadence::Weekly(Weekday::Mon).key(),
            Cadence::Weekly(Weekday::Fri).key()
        );
        assert_ne!(Cadence::Daily.key(), Cadence::MonthlyLastDay.key());
    }

    #[test]
    fn test_display() {
        assert_eq!(Cadence::Daily.to_string(), "daily");
        assert_eq!(Cadence::Weekly(Weekday::Fri).to_string(), "weekly (Fri)");
        assert_eq!(Cadence::MonthlyLastDay.to_string(), "monthly");
    }
}
