//! Email templates and personalization.

mod loader;
mod model;

pub use loader::{MAX_SEQUENCE_LEN, TemplateSet};
pub use model::{Personalization, RenderedMessage, Template, TemplateSource};
