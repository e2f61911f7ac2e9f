//! Template directory loading.
//!
//! A funnel directory holds:
//! - `header.txt` and `footer.txt`, shared by every message (optional)
//! - `email1.txt`, `email2.txt`, ... one per sequence position, 1-based
//! - any other `*.txt` file, available as a named template
//!
//! A message file whose first line starts with `Subject:` takes its subject
//! from that line; otherwise sequence messages are titled `Message <n>` and
//! named templates use their file stem.
//!
//! Sequence numbers above [`MAX_SEQUENCE_LEN`] are ignored with a warning.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, info, warn};

use super::model::{Template, TemplateSource};
use crate::{Error, Result};

const HEADER_FILE: &str = "header.txt";
const FOOTER_FILE: &str = "footer.txt";
const SEQUENCE_PREFIX: &str = "email";

/// Highest sequence number accepted from a file name.
pub const MAX_SEQUENCE_LEN: usize = 10_000;

/// Subject and body of a single message file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MessageFile {
    subject: String,
    body: String,
}

/// An in-memory set of templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    header: String,
    footer: String,
    /// Sequence messages keyed by 1-based position.
    sequence: BTreeMap<usize, MessageFile>,
    /// Number of positions, including gaps.
    count: usize,
    named: HashMap<String, MessageFile>,
}

impl TemplateSet {
    /// Creates an empty set with the given shared header and footer.
    #[must_use]
    pub fn new(header: impl Into<String>, footer: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            footer: footer.into(),
            ..Self::default()
        }
    }

    /// Appends a sequence message.
    #[must_use]
    pub fn with_message(mut self, subject: impl Into<String>, body: impl Into<String>) -> Self {
        self.count += 1;
        self.sequence.insert(
            self.count,
            MessageFile {
                subject: subject.into(),
                body: body.into(),
            },
        );
        self
    }

    /// Appends a sequence position with no message (a gap).
    #[must_use]
    pub fn with_gap(mut self) -> Self {
        self.count += 1;
        self
    }

    /// Adds a named template.
    #[must_use]
    pub fn with_named(
        mut self,
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        self.named.insert(
            name.into(),
            MessageFile {
                subject: subject.into(),
                body: body.into(),
            },
        );
        self
    }

    /// Loads every template from a funnel directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or one of its files cannot be read.
    pub async fn load_dir(dir: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(dir).await? {
            return Err(Error::Template(format!(
                "template directory not found: {}",
                dir.display()
            )));
        }

        let mut set = Self::new(
            read_optional(&dir.join(HEADER_FILE)).await?,
            read_optional(&dir.join(FOOTER_FILE)).await?,
        );

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".txt") else {
                continue;
            };
            if file_name == HEADER_FILE || file_name == FOOTER_FILE {
                continue;
            }

            let contents = tokio::fs::read_to_string(&path).await?;
            match sequence_number(stem) {
                Some(n) if n > MAX_SEQUENCE_LEN => {
                    warn!(
                        file = file_name,
                        max = MAX_SEQUENCE_LEN,
                        "Ignoring out-of-range sequence file"
                    );
                }
                Some(n) => {
                    let message = parse_message(&contents, &format!("Message {n}"));
                    set.sequence.insert(n, message);
                }
                None => {
                    let message = parse_message(&contents, stem);
                    set.named.insert(stem.to_string(), message);
                }
            }
        }

        set.count = set.sequence.keys().next_back().copied().unwrap_or(0);

        info!(
            dir = %dir.display(),
            count = set.count,
            named = set.named.len(),
            "Loaded templates"
        );
        Ok(set)
    }

    fn assemble(&self, message: &MessageFile) -> Template {
        Template {
            subject: message.subject.clone(),
            header: self.header.clone(),
            body: message.body.clone(),
            footer: self.footer.clone(),
        }
    }
}

impl TemplateSource for TemplateSet {
    fn template_count(&self) -> usize {
        self.count
    }

    fn resolve(&self, index: u32) -> Option<Template> {
        let position = usize::try_from(index).ok()?.checked_add(1)?;
        self.sequence.get(&position).map(|m| self.assemble(m))
    }

    fn resolve_named(&self, name: &str) -> Option<Template> {
        self.named.get(name).map(|m| self.assemble(m))
    }
}

/// Reads a file, treating a missing file as empty.
async fn read_optional(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Optional template part missing");
            Ok(String::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parses `email<N>` stems into a 1-based sequence number.
fn sequence_number(stem: &str) -> Option<usize> {
    let digits = stem.strip_prefix(SEQUENCE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n > 0)
}

/// Splits an optional leading `Subject:` line from the body.
fn parse_message(contents: &str, default_subject: &str) -> MessageFile {
    let contents = contents.trim();
    let (first, rest) = contents.split_once('\n').unwrap_or((contents, ""));

    let subject = first
        .get(..8)
        .filter(|p| p.eq_ignore_ascii_case("subject:"))
        .map(|_| first[8..].trim().to_string());

    match subject {
        Some(subject) => MessageFile {
            subject,
            body: rest.trim().to_string(),
        },
        None => MessageFile {
            subject: default_subject.to_string(),
            body: contents.to_string(),
        },
    }
}
