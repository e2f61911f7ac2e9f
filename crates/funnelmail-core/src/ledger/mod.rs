//! Run cadence bookkeeping.
//!
//! A scheduler may fire more often than a cadence should run (e.g. hourly
//! triggers for a daily digest). The [`RunLedger`] remembers when each
//! cadence last ran and whether today is one of its run days.

mod cadence;
mod json;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use cadence::Cadence;
pub use json::JsonRunLedger;

use crate::Result;

/// Persistent record of completed runs.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Returns true if `cadence` is due at `now`: it has not run today and
    /// today is one of its run days.
    async fn should_run(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<bool>;

    /// Records that `cadence` ran at `now`.
    async fn mark_run(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<()>;
}
