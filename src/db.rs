use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{AnalyticsRecord, ExtractedEvent, LoadAttempt, NewLoadAttempt, RawEvent, StoreCounts};
use crate::schema::{analytics_earthquakes, load_history, raw_earthquakes};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database manager for handling connections and operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database at `database_url` with default pool settings
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 10, Duration::from_secs(30))
    }

    /// Open the database described by the configuration
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::with_pool_size(
            &config.path,
            config.max_connections,
            Duration::from_secs(config.connection_timeout_secs),
        )
    }

    fn with_pool_size(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let path = strip_sqlite_scheme(database_url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Set up connection manager and pool
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(timeout)
            .build(manager)?;

        // Run migrations
        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        debug!(path, "Database ready");

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2025-01-10-000000_create_raw_and_ledger/up.sql"))?;
        conn.execute_batch(include_str!("../migrations/2025-01-10-000001_create_analytics/up.sql"))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Get a raw event by identifier
    pub fn get_raw_event(&self, earthquake_id: &str) -> Result<Option<RawEvent>> {
        let conn = self.get_connection()?;

        let event = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    raw_earthquakes::TABLE,
                    raw_earthquakes::EARTHQUAKE_ID
                ),
                params![earthquake_id],
                map_raw_event,
            )
            .optional()?;

        Ok(event)
    }

    /// Get all raw events, ordered by identifier
    pub fn raw_events(&self) -> Result<Vec<RawEvent>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} ASC",
            raw_earthquakes::TABLE,
            raw_earthquakes::EARTHQUAKE_ID
        ))?;
        let rows = stmt.query_map([], map_raw_event)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Append a ledger entry outside of any batch transaction
    pub fn append_load_attempt(&self, attempt: &NewLoadAttempt) -> Result<i64> {
        let conn = self.get_connection()?;
        append_load_attempt(&conn, attempt)
    }

    /// All ledger entries, oldest first
    pub fn load_attempts(&self) -> Result<Vec<LoadAttempt>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} ASC",
            load_history::TABLE,
            load_history::ID
        ))?;
        let rows = stmt.query_map([], map_load_attempt)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Most recent ledger entries, newest first
    pub fn recent_load_attempts(&self, limit: usize) -> Result<Vec<LoadAttempt>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} DESC LIMIT ?",
            load_history::TABLE,
            load_history::ID
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], map_load_attempt)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Get an analytics record by identifier
    pub fn get_analytics_record(&self, earthquake_id: &str) -> Result<Option<AnalyticsRecord>> {
        let conn = self.get_connection()?;

        let record = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    analytics_earthquakes::TABLE,
                    analytics_earthquakes::EARTHQUAKE_ID
                ),
                params![earthquake_id],
                map_analytics_record,
            )
            .optional()?;

        Ok(record)
    }

    /// All analytics records, ordered by identifier
    pub fn analytics_records(&self) -> Result<Vec<AnalyticsRecord>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} ASC",
            analytics_earthquakes::TABLE,
            analytics_earthquakes::EARTHQUAKE_ID
        ))?;
        let rows = stmt.query_map([], map_analytics_record)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Row counts of the raw store, ledger and analytics store
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.get_connection()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        };

        Ok(StoreCounts {
            raw_events: count(raw_earthquakes::TABLE)?,
            load_attempts: count(load_history::TABLE)?,
            analytics_records: count(analytics_earthquakes::TABLE)?,
        })
    }
}

fn strip_sqlite_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

/// Insert a batch into the raw store, skipping identifiers that already exist.
///
/// Returns the number of rows actually inserted.
pub(crate) fn insert_raw_events(
    conn: &Connection,
    events: &[ExtractedEvent],
    source: &str,
    extracted_at: DateTime<Utc>,
) -> Result<u64> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?) ON CONFLICT ({}) DO NOTHING",
        raw_earthquakes::TABLE,
        raw_earthquakes::EARTHQUAKE_ID,
        raw_earthquakes::RAW_PAYLOAD,
        raw_earthquakes::SOURCE,
        raw_earthquakes::EXTRACTED_AT,
        raw_earthquakes::EARTHQUAKE_ID
    ))?;

    let mut inserted = 0_u64;
    for event in events {
        let changed = stmt.execute(params![event.id, event.payload_str(), source, extracted_at])?;
        inserted += changed as u64;
    }
    Ok(inserted)
}

/// Append one row to the load ledger
pub(crate) fn append_load_attempt(conn: &Connection, attempt: &NewLoadAttempt) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
            load_history::TABLE,
            load_history::LOAD_DATE,
            load_history::RECORDS_LOADED,
            load_history::STATUS,
            load_history::ERROR_MESSAGE
        ),
        params![
            attempt.load_date,
            i64::try_from(attempt.records_loaded).unwrap_or(i64::MAX),
            attempt.status.as_str(),
            attempt.error_message
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Raw rows extracted at or after `since`, as `(earthquake_id, raw_payload)`
pub(crate) fn raw_window(conn: &Connection, since: DateTime<Utc>) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, {} FROM {} WHERE {} >= ? ORDER BY {} ASC",
        raw_earthquakes::EARTHQUAKE_ID,
        raw_earthquakes::RAW_PAYLOAD,
        raw_earthquakes::TABLE,
        raw_earthquakes::EXTRACTED_AT,
        raw_earthquakes::EARTHQUAKE_ID
    ))?;
    let rows = stmt.query_map(params![since], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Number of raw rows in the window that already have an analytics row
pub(crate) fn count_derived_in_window(conn: &Connection, since: DateTime<Utc>) -> Result<u64> {
    let n: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {raw} r JOIN {an} a ON a.{an_id} = r.{raw_id} WHERE r.{extracted} >= ?",
            raw = raw_earthquakes::TABLE,
            an = analytics_earthquakes::TABLE,
            an_id = analytics_earthquakes::EARTHQUAKE_ID,
            raw_id = raw_earthquakes::EARTHQUAKE_ID,
            extracted = raw_earthquakes::EXTRACTED_AT
        ),
        params![since],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(n).unwrap_or(0))
}

/// Insert derived rows; on conflict only `transformed_at` is refreshed.
pub(crate) fn upsert_analytics(conn: &Connection, records: &[AnalyticsRecord]) -> Result<()> {
    use analytics_earthquakes as a;

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT ({}) DO UPDATE SET {} = excluded.{}",
        a::TABLE,
        a::EARTHQUAKE_ID,
        a::OCCURRED_AT,
        a::LATITUDE,
        a::LONGITUDE,
        a::DEPTH_KM,
        a::MAGNITUDE,
        a::MAGNITUDE_TYPE,
        a::PLACE,
        a::COUNTRY,
        a::REGION,
        a::MAGNITUDE_CATEGORY,
        a::DEPTH_CATEGORY,
        a::RISK_LEVEL,
        a::DAY_OF_WEEK,
        a::HOUR_OF_DAY,
        a::TRANSFORMED_AT,
        a::EARTHQUAKE_ID,
        a::TRANSFORMED_AT,
        a::TRANSFORMED_AT
    ))?;

    for record in records {
        stmt.execute(params![
            record.earthquake_id,
            record.occurred_at,
            record.latitude,
            record.longitude,
            record.depth_km,
            record.magnitude,
            record.magnitude_type,
            record.place,
            record.country,
            record.region,
            record.magnitude_category.as_str(),
            record.depth_category.as_str(),
            record.risk_level.as_str(),
            record.day_of_week,
            record.hour_of_day,
            record.transformed_at
        ])?;
    }
    Ok(())
}

/// Map a database row to a RawEvent
fn map_raw_event(row: &Row) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(raw_earthquakes::EARTHQUAKE_ID)?,
        payload: row.get(raw_earthquakes::RAW_PAYLOAD)?,
        source: row.get(raw_earthquakes::SOURCE)?,
        extracted_at: row.get(raw_earthquakes::EXTRACTED_AT)?,
    })
}

/// Map a database row to a LoadAttempt
fn map_load_attempt(row: &Row) -> rusqlite::Result<LoadAttempt> {
    let records_loaded: i64 = row.get(load_history::RECORDS_LOADED)?;
    Ok(LoadAttempt {
        id: row.get(load_history::ID)?,
        load_date: row.get(load_history::LOAD_DATE)?,
        records_loaded: u64::try_from(records_loaded).unwrap_or(0),
        status: parse_text(row, load_history::STATUS)?,
        error_message: row.get(load_history::ERROR_MESSAGE)?,
    })
}

/// Map a database row to an AnalyticsRecord
fn map_analytics_record(row: &Row) -> rusqlite::Result<AnalyticsRecord> {
    use analytics_earthquakes as a;

    Ok(AnalyticsRecord {
        earthquake_id: row.get(a::EARTHQUAKE_ID)?,
        occurred_at: row.get(a::OCCURRED_AT)?,
        latitude: row.get(a::LATITUDE)?,
        longitude: row.get(a::LONGITUDE)?,
        depth_km: row.get(a::DEPTH_KM)?,
        magnitude: row.get(a::MAGNITUDE)?,
        magnitude_type: row.get(a::MAGNITUDE_TYPE)?,
        place: row.get(a::PLACE)?,
        country: row.get(a::COUNTRY)?,
        region: row.get(a::REGION)?,
        magnitude_category: parse_text(row, a::MAGNITUDE_CATEGORY)?,
        depth_category: parse_text(row, a::DEPTH_CATEGORY)?,
        risk_level: parse_text(row, a::RISK_LEVEL)?,
        day_of_week: row.get(a::DAY_OF_WEEK)?,
        hour_of_day: row.get(a::HOUR_OF_DAY)?,
        transformed_at: row.get(a::TRANSFORMED_AT)?,
    })
}

/// Read a text column and parse it into one of the model enums
fn parse_text<T>(row: &Row, column: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(column)?;
    text.parse().map_err(|e: String| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, e.into())
    })
}
