//! Derivation of analytics rows from the raw store.
//!
//! The engine re-scans a trailing window of raw rows (by `extracted_at`),
//! derives every row in memory, and writes the whole batch inside one
//! immediate transaction. A single malformed payload aborts the window.

use chrono::{DateTime, Timelike, Utc};
use rusqlite::TransactionBehavior;
use serde::Deserialize;
use tracing::{error, info, instrument};

use crate::db::{self, Database};
use crate::error::{PipelineError, Result};
use crate::models::{AnalyticsRecord, DepthCategory, MagnitudeCategory, RiskLevel};

/// Fallback when no country rule matches
pub const UNKNOWN_COUNTRY: &str = "Other";

/// Place substring → country, evaluated in order, first match wins.
pub const COUNTRY_RULES: &[(&str, &str)] = &[
    ("Mexico", "Mexico"),
    ("California", "United States"),
    ("Japan", "Japan"),
    ("Chile", "Chile"),
];

/// Classify a magnitude on the Minor..Major ladder
#[must_use]
pub fn magnitude_category(magnitude: f64) -> MagnitudeCategory {
    if magnitude < 3.0 {
        MagnitudeCategory::Minor
    } else if magnitude < 5.0 {
        MagnitudeCategory::Light
    } else if magnitude < 6.0 {
        MagnitudeCategory::Moderate
    } else if magnitude < 7.0 {
        MagnitudeCategory::Strong
    } else {
        MagnitudeCategory::Major
    }
}

/// Classify a hypocentre depth in kilometres
#[must_use]
pub fn depth_category(depth_km: f64) -> DepthCategory {
    if depth_km < 70.0 {
        DepthCategory::Shallow
    } else if depth_km < 300.0 {
        DepthCategory::Intermediate
    } else {
        DepthCategory::Deep
    }
}

/// Combine magnitude and depth into a risk level
#[must_use]
pub fn risk_level(magnitude: f64, depth_km: f64) -> RiskLevel {
    if magnitude >= 6.0 && depth_km < 70.0 {
        RiskLevel::High
    } else if magnitude >= 5.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Country named by the first matching rule, or [`UNKNOWN_COUNTRY`]
#[must_use]
pub fn country_for_place(place: &str) -> &'static str {
    COUNTRY_RULES
        .iter()
        .find(|(needle, _)| place.contains(*needle))
        .map_or(UNKNOWN_COUNTRY, |&(_, country)| country)
}

/// Trimmed text after the last comma; the whole (trimmed) place when there is none
#[must_use]
pub fn region_for_place(place: &str) -> &str {
    place.rsplit(',').next().unwrap_or(place).trim()
}

#[derive(Debug, Deserialize)]
struct FeaturePayload {
    properties: FeatureProperties,
    geometry: FeatureGeometry,
}

#[derive(Debug, Deserialize)]
struct FeatureProperties {
    time: i64,
    mag: f64,
    #[serde(rename = "magType")]
    mag_type: String,
    place: String,
}

#[derive(Debug, Deserialize)]
struct FeatureGeometry {
    coordinates: Vec<f64>,
}

/// Derive one analytics row from a stored raw payload.
pub fn derive_record(
    earthquake_id: &str,
    payload: &str,
    transformed_at: DateTime<Utc>,
) -> Result<AnalyticsRecord> {
    let feature: FeaturePayload =
        serde_json::from_str(payload).map_err(|e| PipelineError::malformed(earthquake_id, e))?;

    let [longitude, latitude, depth_km] = match feature.geometry.coordinates.as_slice() {
        [lon, lat, depth, ..] => [*lon, *lat, *depth],
        other => {
            return Err(PipelineError::malformed(
                earthquake_id,
                format!("expected [longitude, latitude, depth], got {} coordinates", other.len()),
            ))
        }
    };

    let properties = feature.properties;
    let occurred_at = DateTime::<Utc>::from_timestamp_millis(properties.time).ok_or_else(|| {
        PipelineError::malformed(earthquake_id, format!("time {} is out of range", properties.time))
    })?;
    let magnitude = properties.mag;

    Ok(AnalyticsRecord {
        earthquake_id: earthquake_id.to_string(),
        occurred_at,
        latitude,
        longitude,
        depth_km,
        magnitude,
        magnitude_type: properties.mag_type,
        country: country_for_place(&properties.place).to_string(),
        region: region_for_place(&properties.place).to_string(),
        place: properties.place,
        magnitude_category: magnitude_category(magnitude),
        depth_category: depth_category(depth_km),
        risk_level: risk_level(magnitude, depth_km),
        day_of_week: occurred_at.format("%A").to_string(),
        hour_of_day: occurred_at.hour(),
        transformed_at,
    })
}

/// Counts from one transform pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Raw rows inside the window
    pub scanned: u64,
    /// Rows derived for the first time
    pub inserted: u64,
    /// Rows that already existed; only `transformed_at` moved
    pub refreshed: u64,
}

/// Re-derives the analytics store from a trailing window of raw rows
#[derive(Clone)]
pub struct TransformEngine {
    db: Database,
    window: chrono::Duration,
}

impl TransformEngine {
    /// Trailing window used when none is configured
    pub const DEFAULT_WINDOW_HOURS: i64 = 48;

    pub fn new(db: Database, window: chrono::Duration) -> Self {
        Self { db, window }
    }

    pub fn with_default_window(db: Database) -> Self {
        Self::new(db, chrono::Duration::hours(Self::DEFAULT_WINDOW_HOURS))
    }

    pub const fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Run the transform against the current time
    pub fn run(&self) -> Result<TransformOutcome> {
        self.run_at(Utc::now())
    }

    /// Run the transform as if the current time were `now`
    #[instrument(skip(self), fields(window_hours = self.window.num_hours()))]
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<TransformOutcome> {
        let since = now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let window = db::raw_window(&tx, since)?;
        let refreshed = db::count_derived_in_window(&tx, since)?;

        let records = window
            .iter()
            .map(|(id, payload)| derive_record(id, payload, now))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| error!(error = %e, "Transform aborted, window left untouched"))?;

        db::upsert_analytics(&tx, &records)?;
        tx.commit()?;

        let scanned = records.len() as u64;
        let outcome = TransformOutcome {
            scanned,
            inserted: scanned.saturating_sub(refreshed),
            refreshed,
        };
        info!(
            scanned = outcome.scanned,
            inserted = outcome.inserted,
            refreshed = outcome.refreshed,
            "Transform committed"
        );
        Ok(outcome)
    }
}
