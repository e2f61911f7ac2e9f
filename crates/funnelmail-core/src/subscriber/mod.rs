//! Subscribers and their position in the send sequence.

mod model;
mod repository;
mod store;

pub(crate) use model::address_problem;
pub use model::{SubscribeOutcome, Subscriber};
pub use repository::SubscriberRepository;
pub use store::{Advance, DueSubscribers, SubscriberStore, UnreadableRecord};
