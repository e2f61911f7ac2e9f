//! Send-date scheduling.
//!
//! Sequence emails are only ever scheduled on weekdays. The next send time
//! is always the following weekday, never the same day and never a Saturday
//! or Sunday.

mod weekday;

pub use weekday::{is_weekend, next_weekday};
