//! Conflict-safe loading of extracted batches into the raw store.

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::db::{self, Database};
use crate::error::Result;
use crate::models::{ExtractedEvent, LoadStatus, NewLoadAttempt};

/// Result of a committed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Events in the batch handed to the loader
    pub batch_size: u64,
    /// Rows newly inserted; duplicates are not counted
    pub records_loaded: u64,
    /// Ledger row written for this load
    pub ledger_id: i64,
}

impl LoadOutcome {
    /// Events skipped because their identifier was already stored
    pub const fn duplicates(&self) -> u64 {
        self.batch_size.saturating_sub(self.records_loaded)
    }
}

/// Writes batches into the raw store and records each attempt in the ledger
#[derive(Clone)]
pub struct Loader {
    db: Database,
    source: String,
}

impl Loader {
    pub fn new(db: Database, source: impl Into<String>) -> Self {
        Self {
            db,
            source: source.into(),
        }
    }

    /// Load a batch, stamping new rows with the current time
    pub fn load(&self, batch: &[ExtractedEvent]) -> Result<LoadOutcome> {
        self.load_at(batch, Utc::now())
    }

    /// Load a batch as a single transaction, stamping new rows with `now`.
    ///
    /// On success the raw rows and a SUCCESS ledger row commit together. On
    /// failure nothing from the batch persists and a FAILED ledger row is
    /// written on a best-effort basis; the original error is always returned.
    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub fn load_at(&self, batch: &[ExtractedEvent], now: DateTime<Utc>) -> Result<LoadOutcome> {
        match self.load_in_transaction(batch, now) {
            Ok(outcome) => {
                info!(
                    records_loaded = outcome.records_loaded,
                    duplicates = outcome.duplicates(),
                    "Loaded new raw earthquake records"
                );
                Ok(outcome)
            },
            Err(e) => {
                error!(error = %e, "Load failed, batch rolled back");
                self.record_failure(&e.to_string(), now);
                Err(e)
            },
        }
    }

    fn load_in_transaction(&self, batch: &[ExtractedEvent], now: DateTime<Utc>) -> Result<LoadOutcome> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;

        let records_loaded = db::insert_raw_events(&tx, batch, &self.source, now)?;
        let ledger_id = db::append_load_attempt(
            &tx,
            &NewLoadAttempt {
                load_date: now,
                records_loaded,
                status: LoadStatus::Success,
                error_message: None,
            },
        )?;
        tx.commit()?;

        Ok(LoadOutcome {
            batch_size: batch.len() as u64,
            records_loaded,
            ledger_id,
        })
    }

    fn record_failure(&self, message: &str, now: DateTime<Utc>) {
        let attempt = NewLoadAttempt {
            load_date: now,
            records_loaded: 0,
            status: LoadStatus::Failed,
            error_message: Some(message.to_string()),
        };
        // The ledger entry is diagnostic only; never let it replace the load error.
        if let Err(ledger_err) = self.db.append_load_attempt(&attempt) {
            warn!(error = %ledger_err, "Could not record failed load in ledger");
        }
    }
}
