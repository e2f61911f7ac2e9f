//! Drip-sequence batch runner.
//!
//! The [`Sequencer`] owns every subscriber state transition: it picks due
//! subscribers, sends the template at their current position, and advances
//! them only once the mail provider has accepted the message.

mod runner;
mod summary;

pub use runner::{Sequencer, SequencerOptions};
pub use summary::{BatchSummary, Outcome, SubscriberIssue};
