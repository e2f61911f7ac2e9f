//! Template data models.

use chrono::{DateTime, Utc};

/// Placeholder replaced by the subscriber name.
const NAME_PLACEHOLDER: &str = "${name}";
/// Placeholder replaced by the send date.
const DATE_PLACEHOLDER: &str = "${date}";

/// Content for one email, before personalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Subject line.
    pub subject: String,
    /// Shared header block.
    pub header: String,
    /// Message-specific body.
    pub body: String,
    /// Shared footer block.
    pub footer: String,
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personalization {
    /// Subscriber name.
    pub name: String,
    /// Formatted send date.
    pub date: String,
}

impl Personalization {
    /// Builds personalization values for a subscriber at a given time.
    #[must_use]
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            date: now.format("%B %-d, %Y").to_string(),
        }
    }

    fn apply(&self, text: &str) -> String {
        text.replace(NAME_PLACEHOLDER, &self.name)
            .replace(DATE_PLACEHOLDER, &self.date)
    }
}

/// A personalized subject and body ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Personalized subject.
    pub subject: String,
    /// Header, blank line, body, blank line, footer.
    pub body: String,
}

impl Template {
    /// Personalizes the template.
    ///
    /// The body is always assembled as header, blank line, body, blank line,
    /// footer, even when a segment is empty.
    #[must_use]
    pub fn render(&self, values: &Personalization) -> RenderedMessage {
        let body = format!(
            "{}\n\n{}\n\n{}",
            values.apply(&self.header),
            values.apply(&self.body),
            values.apply(&self.footer),
        );

        RenderedMessage {
            subject: values.apply(&self.subject),
            body,
        }
    }
}

/// Resolves sequence positions and names to templates.
pub trait TemplateSource: Send + Sync {
    /// Number of positions in the sequence.
    fn template_count(&self) -> usize;

    /// Returns the template at a sequence position, if present.
    fn resolve(&self, index: u32) -> Option<Template>;

    /// Returns a template by name (e.g. `welcome`), if present.
    fn resolve_named(&self, name: &str) -> Option<Template>;
}
