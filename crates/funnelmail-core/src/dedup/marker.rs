//! Local sent-marker files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::key::DedupKey;
use super::model::{SentRecord, SentStore};
use crate::Result;

/// Local tier: one marker file per delivered message.
///
/// Each marker is named `<key>.sent` and holds a readable copy of the
/// record, so the directory doubles as an operator-facing log of sends.
#[derive(Debug, Clone)]
pub struct MarkerDirectory {
    root: PathBuf,
}

impl MarkerDirectory {
    /// Creates a marker store rooted at `root`. The directory is created on
    /// first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the marker directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker_path(&self, key: &DedupKey) -> PathBuf {
        self.root.join(format!("{key}.sent"))
    }
}

/// Renders the marker file body.
fn render_marker(record: &SentRecord) -> String {
    format!(
        "Date: {}\nTo: {}\nSubject: {}\nMessage-Id: {}\nKey: {}\n",
        record.sent_at.to_rfc3339(),
        record.recipient,
        record.subject,
        record.message_id,
        record.key,
    )
}

#[async_trait]
impl SentStore for MarkerDirectory {
    async fn contains(&self, key: &DedupKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.marker_path(key)).await?)
    }

    async fn insert(&self, record: &SentRecord) -> Result<()> {
        let path = self.marker_path(&record.key);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.root).await?;

        // Write-then-rename so a reader never sees a half-written marker.
        let tmp = path.with_extension("sent.tmp");
        tokio::fs::write(&tmp, render_marker(record)).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key = %record.key, path = %path.display(), "Wrote sent marker");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_and_contains() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerDirectory::new(dir.path().join("SENT"));
        let record = SentRecord::new("a@x.com", "Message 1", "id-1", Utc::now());

        assert!(!store.contains(&record.key).await.unwrap());
        store.insert(&record).await.unwrap();
        assert!(store.contains(&record.key).await.unwrap());

        let body = std::fs::read_to_string(store.marker_path(&record.key)).unwrap();
        assert!(body.contains("To: a@x.com"));
        assert!(body.contains("Subject: Message 1"));
        assert!(body.contains("Message-Id: id-1"));
    }

    #[tokio::test]
    async fn test_insert_existing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerDirectory::new(dir.path());
        let first = SentRecord::new("a@x.com", "Hello", "id-1", Utc::now());
        let second = SentRecord::new("a@x.com", "Hello", "id-2", Utc::now());

        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let body = std::fs::read_to_string(store.marker_path(&first.key)).unwrap();
        assert!(body.contains("id-1"));
        assert!(!body.contains("id-2"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerDirectory::new(dir.path().join("does-not-exist"));
        let key = DedupKey::derive("a@x.com", "Hello");
        assert!(!store.contains(&key).await.unwrap());
    }
}
