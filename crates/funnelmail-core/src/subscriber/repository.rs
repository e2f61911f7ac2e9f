//! Subscriber storage repository.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, info, warn};

use super::model::{SubscribeOutcome, Subscriber};
use super::store::{Advance, DueSubscribers, SubscriberStore, UnreadableRecord};
use crate::{Error, Result};

const COLUMNS: &str = "email, name, joined_at, confirmed, unsubscribed, welcome_sent, \
                       sequence_index, next_send_time";

/// Repository for subscriber storage and retrieval.
#[derive(Clone)]
pub struct SubscriberRepository {
    pool: SqlitePool,
}

impl SubscriberRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::from_pool(pool).await
    }

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

    /// Returns the underlying pool so other repositories can share it.
    #[must_use]
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS subscribers (
                email TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                joined_at TEXT NOT NULL,
                confirmed INTEGER NOT NULL DEFAULT 1,
                unsubscribed INTEGER NOT NULL DEFAULT 0,
                welcome_sent INTEGER NOT NULL DEFAULT 0,
                sequence_index INTEGER NOT NULL DEFAULT 0,
                next_send_time TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Index for the due-subscriber query
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_subscribers_due
            ON subscribers(unsubscribed, next_send_time)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Add a subscriber at the start of the sequence.
    ///
    /// An existing address is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn subscribe(
        &self,
        name: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<SubscribeOutcome> {
        let subscriber = Subscriber::new(name, email, now);

        let result = sqlx::query(
            r"
            INSERT INTO subscribers
                (email, name, joined_at, confirmed, unsubscribed, welcome_sent,
                 sequence_index, next_send_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            ",
        )
        .bind(&subscriber.email)
        .bind(&subscriber.name)
        .bind(format_time(subscriber.joined_at))
        .bind(subscriber.confirmed)
        .bind(subscriber.unsubscribed)
        .bind(subscriber.welcome_sent)
        .bind(i64::from(subscriber.sequence_index))
        .bind(subscriber.next_send_time.map(format_time))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            info!(email = %subscriber.email, "Subscriber already exists");
            Ok(SubscribeOutcome::AlreadyExists)
        } else {
            info!(email = %subscriber.email, "New subscriber added");
            Ok(SubscribeOutcome::Created)
        }
    }

    /// Insert or replace a full subscriber record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert(&self, subscriber: &Subscriber) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO subscribers
                (email, name, joined_at, confirmed, unsubscribed, welcome_sent,
                 sequence_index, next_send_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                name = excluded.name,
                joined_at = excluded.joined_at,
                confirmed = excluded.confirmed,
                unsubscribed = excluded.unsubscribed,
                welcome_sent = excluded.welcome_sent,
                sequence_index = excluded.sequence_index,
                next_send_time = excluded.next_send_time
            ",
        )
        .bind(&subscriber.email)
        .bind(&subscriber.name)
        .bind(format_time(subscriber.joined_at))
        .bind(subscriber.confirmed)
        .bind(subscriber.unsubscribed)
        .bind(subscriber.welcome_sent)
        .bind(i64::from(subscriber.sequence_index))
        .bind(subscriber.next_send_time.map(format_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a subscriber as unsubscribed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriberNotFound`] if the address is unknown, or an
    /// error if the database query fails.
    pub async fn unsubscribe(&self, email: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        let result = sqlx::query(
            r"
            UPDATE subscribers SET unsubscribed = 1 WHERE email = ?
            ",
        )
        .bind(&email)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::SubscriberNotFound(email));
        }
        info!(%email, "Subscriber unsubscribed");
        Ok(())
    }

    /// Get all subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Subscriber>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM subscribers ORDER BY joined_at ASC, email ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(readable_rows(&rows))
    }
}

/// Fixed-width UTC timestamps so that text comparison orders correctly.
fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_subscriber(row: &SqliteRow) -> std::result::Result<Subscriber, UnreadableRecord> {
    let email: String = row.try_get("email").unwrap_or_default();
    let unreadable = |reason: String| UnreadableRecord {
        email: email.clone(),
        reason,
    };
    let column = |e: sqlx::Error| unreadable(e.to_string());

    let raw_joined: String = row.try_get("joined_at").map_err(column)?;
    let joined_at = parse_time(&raw_joined)
        .ok_or_else(|| unreadable(format!("unreadable joined_at: {raw_joined}")))?;

    let raw_next: Option<String> = row.try_get("next_send_time").map_err(column)?;
    let next_send_time = match raw_next {
        None => None,
        Some(raw) => Some(
            parse_time(&raw)
                .ok_or_else(|| unreadable(format!("unreadable next_send_time: {raw}")))?,
        ),
    };

    let raw_index: i64 = row.try_get("sequence_index").map_err(column)?;
    let sequence_index = u32::try_from(raw_index)
        .map_err(|_| unreadable(format!("sequence_index out of range: {raw_index}")))?;

    let name: String = row.try_get("name").map_err(column)?;
    let confirmed: bool = row.try_get("confirmed").map_err(column)?;
    let unsubscribed: bool = row.try_get("unsubscribed").map_err(column)?;
    let welcome_sent: bool = row.try_get("welcome_sent").map_err(column)?;

    Ok(Subscriber {
        email,
        name,
        joined_at,
        confirmed,
        unsubscribed,
        welcome_sent,
        sequence_index,
        next_send_time,
    })
}

/// Decodes rows for listing, logging and dropping any that cannot be read.
fn readable_rows(rows: &[SqliteRow]) -> Vec<Subscriber> {
    rows.iter()
        .filter_map(|row| match row_to_subscriber(row) {
            Ok(subscriber) => Some(subscriber),
            Err(bad) => {
                warn!(email = %bad.email, reason = %bad.reason, "Skipping unreadable subscriber");
                None
            }
        })
        .collect()
}

#[async_trait]
impl SubscriberStore for SubscriberRepository {
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<DueSubscribers> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS}
            FROM subscribers
            WHERE unsubscribed = 0
              AND (next_send_time IS NULL OR next_send_time <= ?)
            ORDER BY email ASC
            "
        ))
        .bind(format_time(now))
        .fetch_all(&self.pool)
        .await?;

        let mut due = DueSubscribers::default();
        for row in &rows {
            match row_to_subscriber(row) {
                Ok(subscriber) => due.subscribers.push(subscriber),
                Err(bad) => {
                    warn!(email = %bad.email, reason = %bad.reason, "Due subscriber is unreadable");
                    due.unreadable.push(bad);
                }
            }
        }
        debug!(
            count = due.subscribers.len(),
            unreadable = due.unreadable.len(),
            "Fetched due subscribers"
        );
        Ok(due)
    }

    async fn get(&self, email: &str) -> Result<Option<Subscriber>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM subscribers WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        match row.as_ref().map(row_to_subscriber) {
            Some(Ok(subscriber)) => Ok(Some(subscriber)),
            Some(Err(bad)) => {
                warn!(email = %bad.email, reason = %bad.reason, "Subscriber is unreadable");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn advance(&self, update: &Advance) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE subscribers
            SET sequence_index = sequence_index + 1,
                next_send_time = ?,
                welcome_sent = CASE WHEN ? THEN 1 ELSE welcome_sent END
            WHERE email = ? AND sequence_index = ?
            ",
        )
        .bind(format_time(update.next_send_time))
        .bind(update.mark_welcome)
        .bind(&update.email)
        .bind(i64::from(update.from_index))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
