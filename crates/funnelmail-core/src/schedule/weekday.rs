//! Next-weekday computation.

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc, Weekday};

/// Returns true if the date falls on a Saturday or Sunday (UTC).
#[must_use]
pub fn is_weekend(at: DateTime<Utc>) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Computes the next eligible send time after `now`.
///
/// One calendar day is added; a Saturday result moves to Monday (+2), a
/// Sunday result moves to Monday (+1). When `send_time` is given the time of
/// day is replaced by it, otherwise the time of day of `now` is kept.
///
/// The result is always a weekday, strictly after `now`, and one to three
/// calendar days after it.
#[must_use]
pub fn next_weekday(now: DateTime<Utc>, send_time: Option<NaiveTime>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Days::new(1);
    let skip = match tomorrow.weekday() {
        Weekday::Sat => 2,
        Weekday::Sun => 1,
        _ => 0,
    };
    let date = tomorrow + Days::new(skip);
    let time = send_time.unwrap_or_else(|| now.time());

    date.and_time(time).and_utc()
}
