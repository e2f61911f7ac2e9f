//! # funnelmail-core
//!
//! Core logic for `FunnelMail`, a scheduled drip-sequence email sender.
//!
//! This crate provides:
//! - **Subscribers** - records, due queries and atomic progress updates (`SQLite`)
//! - **Templates** - funnel directories and personalization
//! - **Sequencer** - one batch: pick due subscribers, send, advance
//! - **Duplicate Guard** - two-tier suppression of repeat sends
//! - **Scheduling** - next-weekday computation
//! - **Run Ledger** - daily/weekly/monthly cadence bookkeeping
//! - **Configuration** - JSON file plus environment overrides
//!
//! Mail transports implement [`Mailer`] and live in `funnelmail-transport`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dedup;
mod error;
pub mod ledger;
pub mod mailer;
pub mod schedule;
pub mod sequencer;
pub mod subscriber;
pub mod template;

pub use config::{Config, OAuthConfig, RetryConfig, Security, TransportConfig, TransportKind};
pub use dedup::{
    DedupKey, DuplicateGuard, MarkerDirectory, SentRecord, SentRecordRepository, SentStore,
};
pub use error::{Error, Result};
pub use ledger::{Cadence, JsonRunLedger, RunLedger};
pub use mailer::{Delivery, Mailer, MailerError, OutgoingMessage};
pub use schedule::{is_weekend, next_weekday};
pub use sequencer::{BatchSummary, Outcome, Sequencer, SequencerOptions, SubscriberIssue};
pub use subscriber::{
    Advance, DueSubscribers, SubscribeOutcome, Subscriber, SubscriberRepository, SubscriberStore,
    UnreadableRecord,
};
pub use template::{Personalization, RenderedMessage, Template, TemplateSet, TemplateSource};
