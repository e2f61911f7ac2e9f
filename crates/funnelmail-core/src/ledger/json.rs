//! JSON-file run ledger.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Cadence, RunLedger};
use crate::Result;

/// Last-run bookkeeping for one cadence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_run: Option<NaiveDate>,
}

/// Run ledger persisted as a small JSON document.
///
/// Writes go to a temporary file that is renamed over the ledger, so a crash
/// mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct JsonRunLedger {
    path: PathBuf,
}

impl JsonRunLedger {
    /// Creates a ledger backed by `path`. A missing file means nothing ran yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<BTreeMap<String, LedgerEntry>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, LedgerEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RunLedger for JsonRunLedger {
    async fn should_run(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<bool> {
        let today = now.date_naive();
        let entries = self.load().await?;

        if entries
            .get(cadence.key())
            .and_then(|e| e.last_run)
            .is_some_and(|last| last == today)
        {
            info!(%cadence, %today, "Already run today");
            return Ok(false);
        }

        if !cadence.runs_on(today) {
            info!(%cadence, %today, "Not a run day");
            return Ok(false);
        }

        Ok(true)
    }

    async fn mark_run(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<()> {
        let mut entries = self.load().await?;
        entries.entry(cadence.key().to_string()).or_default().last_run = Some(now.date_naive());
        self.save(&entries).await
    }
}
