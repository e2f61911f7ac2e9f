//! Duplicate-send suppression.
//!
//! Every delivered message leaves a [`SentRecord`] keyed by a [`DedupKey`]
//! derived from the recipient and the rendered subject. Lookups go through a
//! fast local tier (marker files next to the runner) before falling back to
//! the authoritative shared tier (the database), since the local tier may be
//! stale or partial when runs move between machines.

mod guard;
mod key;
mod marker;
mod model;
mod repository;

pub use guard::DuplicateGuard;
pub use key::DedupKey;
pub(crate) use key::normalize_recipient;
pub use marker::MarkerDirectory;
pub use model::{SentRecord, SentStore};
pub use repository::SentRecordRepository;
