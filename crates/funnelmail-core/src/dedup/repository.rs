//! Shared sent-record storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::key::DedupKey;
use super::model::{SentRecord, SentStore};
use crate::Result;

/// Authoritative tier: sent records in the shared database.
#[derive(Clone)]
pub struct SentRecordRepository {
    pool: SqlitePool,
}

impl SentRecordRepository {
    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a repository sharing an existing pool.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sent_records (
                dedup_key TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                message_id TEXT NOT NULL DEFAULT '',
                sent_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_sent_records_recipient ON sent_records(recipient)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a sent record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, key: &DedupKey) -> Result<Option<SentRecord>> {
        let row = sqlx::query(
            r"
            SELECT dedup_key, recipient, subject, message_id, sent_at
            FROM sent_records
            WHERE dedup_key = ?
            ",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_record))
    }

    /// List all records sent to a recipient, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_for_recipient(&self, recipient: &str) -> Result<Vec<SentRecord>> {
        let rows = sqlx::query(
            r"
            SELECT dedup_key, recipient, subject, message_id, sent_at
            FROM sent_records
            WHERE recipient = ?
            ORDER BY sent_at ASC
            ",
        )
        .bind(recipient.trim().to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_record).collect())
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Option<SentRecord> {
    let sent_at: String = row.try_get("sent_at").ok()?;
    let sent_at = DateTime::parse_from_rfc3339(&sent_at)
        .ok()?
        .with_timezone(&Utc);

    Some(SentRecord {
        key: DedupKey::from_raw(row.try_get::<String, _>("dedup_key").ok()?),
        recipient: row.try_get("recipient").ok()?,
        subject: row.try_get("subject").ok()?,
        message_id: row.try_get("message_id").ok()?,
        sent_at,
    })
}

#[async_trait]
impl SentStore for SentRecordRepository {
    async fn contains(&self, key: &DedupKey) -> Result<bool> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) as count
            FROM sent_records
            WHERE dedup_key = ?
            ",
        )
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn insert(&self, record: &SentRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sent_records (dedup_key, recipient, subject, message_id, sent_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(dedup_key) DO NOTHING
            ",
        )
        .bind(record.key.as_str())
        .bind(&record.recipient)
        .bind(&record.subject)
        .bind(&record.message_id)
        .bind(record.sent_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = SentRecordRepository::in_memory().await.unwrap();
        let record = SentRecord::new("A@X.com", "Message 1", "id-1", Utc::now());

        repo.insert(&record).await.unwrap();

        assert!(repo.contains(&record.key).await.unwrap());
        let stored = repo.get(&record.key).await.unwrap().unwrap();
        assert_eq!(stored.recipient, "a@x.com");
        assert_eq!(stored.subject, "Message 1");
        assert_eq!(stored.message_id, "id-1");
    }

    #[tokio::test]
    async fn test_records_are_never_overwritten() {
        let repo = SentRecordRepository::in_memory().await.unwrap();
        let first = SentRecord::new("a@x.com", "Hello", "id-1", Utc::now());
        let again = SentRecord::new("a@x.com", "Hello", "id-2", Utc::now());

        repo.insert(&first).await.unwrap();
        repo.insert(&again).await.unwrap();

        let stored = repo.get(&first.key).await.unwrap().unwrap();
        assert_eq!(stored.message_id, "id-1");
    }

    #[tokio::test]
    async fn test_list_for_recipient() {
        let repo = SentRecordRepository::in_memory().await.unwrap();
        let now = Utc::now();

        repo.insert(&SentRecord::new("a@x.com", "Message 2", "id-2", now))
            .await
            .unwrap();
        repo.insert(&SentRecord::new("a@x.com", "Message 1", "id-1", now - Duration::days(1)))
            .await
            .unwrap();
        repo.insert(&SentRecord::new("b@x.com", "Message 1", "id-3", now))
            .await
            .unwrap();

        let sent = repo.list_for_recipient("A@x.com").await.unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "Message 1");
        assert_eq!(sent[1].subject, "Message 2");
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let repo = SentRecordRepository::in_memory().await.unwrap();
        let key = DedupKey::derive("a@x.com", "Never sent");
        assert!(!repo.contains(&key).await.unwrap());
        assert!(repo.get(&key).await.unwrap().is_none());
    }
}
