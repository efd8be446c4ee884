//! Data models for earthquake events and their storage
//!
//! This module contains the records that flow between the pipeline stages:
//! extracted feed events, stored raw rows, ledger entries and derived
//! analytics rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::str::FromStr;

/// Half-open extraction window `[start, end)` with a magnitude floor
#[derive(Debug, Clone, PartialEq)]
pub struct FeedWindow {
    /// Window start (inclusive)
    pub start: DateTime<Utc>,
    /// Window end (exclusive)
    pub end: DateTime<Utc>,
    /// Smallest magnitude requested from the feed
    pub min_magnitude: f64,
}

impl FeedWindow {
    /// Window covering `lookback` up to `now`.
    #[must_use]
    pub fn trailing(now: DateTime<Utc>, lookback: chrono::Duration, min_magnitude: f64) -> Self {
        Self {
            start: now.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
            min_magnitude,
        }
    }

    /// Feed `starttime` parameter (UTC calendar date)
    #[must_use]
    pub fn start_date(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    /// Feed `endtime` parameter (UTC calendar date)
    #[must_use]
    pub fn end_date(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// One event as returned by the feed, with its JSON kept verbatim
#[derive(Debug, Clone)]
pub struct ExtractedEvent {
    /// Feed event identifier
    pub id: String,
    /// The feature exactly as it appeared in the response body
    pub payload: Box<RawValue>,
}

impl ExtractedEvent {
    /// Build an event from its JSON text, reading the `id` field.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let payload = RawValue::from_string(json.to_string())?;
        Self::from_raw(payload)
    }

    /// Build an event from an already captured raw feature.
    pub fn from_raw(payload: Box<RawValue>) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        struct FeatureId {
            id: String,
        }

        let FeatureId { id } = serde_json::from_str(payload.get())?;
        Ok(Self { id, payload })
    }

    /// Payload text
    #[must_use]
    pub fn payload_str(&self) -> &str {
        self.payload.get()
    }
}

/// Row of the raw store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Unique event identifier
    pub id: String,
    /// Stored payload, byte-for-byte as received
    pub payload: String,
    /// Source tag
    pub source: String,
    /// When the row was inserted
    pub extracted_at: DateTime<Utc>,
}

/// Outcome status of a loader invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    /// Batch committed
    Success,
    /// Batch rolled back
    Failed,
}

impl LoadStatus {
    /// Value stored in the ledger
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown load status: {other}")),
        }
    }
}

/// Ledger row describing one loader invocation
#[derive(Debug, Clone, PartialEq)]
pub struct LoadAttempt {
    /// Ledger primary key
    pub id: i64,
    /// When the load ran
    pub load_date: DateTime<Utc>,
    /// Rows newly inserted (duplicates excluded)
    pub records_loaded: u64,
    /// SUCCESS or FAILED
    pub status: LoadStatus,
    /// Captured error text for failed loads
    pub error_message: Option<String>,
}

/// Ledger entry to append
#[derive(Debug, Clone)]
pub struct NewLoadAttempt {
    /// When the load ran
    pub load_date: DateTime<Utc>,
    /// Rows newly inserted
    pub records_loaded: u64,
    /// Outcome of the load
    pub status: LoadStatus,
    /// Error text, set only for failed loads
    pub error_message: Option<String>,
}

/// Magnitude class, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MagnitudeCategory {
    /// Below 3.0
    Minor,
    /// 3.0 up to 5.0
    Light,
    /// 5.0 up to 6.0
    Moderate,
    /// 6.0 up to 7.0
    Strong,
    /// 7.0 and above
    Major,
}

/// Depth class, ordered from shallowest to deepest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DepthCategory {
    /// Shallower than 70 km
    Shallow,
    /// 70 km up to 300 km
    Intermediate,
    /// 300 km and deeper
    Deep,
}

/// Combined magnitude/depth risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Below magnitude 5.0
    Low,
    /// Magnitude 5.0 or more, unless high
    Medium,
    /// Magnitude 6.0 or more and shallower than 70 km
    High,
}

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Value stored in the analytics table
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($ty), ": {}"), other)),
                }
            }
        }
    };
}

text_enum!(MagnitudeCategory {
    Minor => "Minor",
    Light => "Light",
    Moderate => "Moderate",
    Strong => "Strong",
    Major => "Major",
});

text_enum!(DepthCategory {
    Shallow => "Shallow",
    Intermediate => "Intermediate",
    Deep => "Deep",
});

text_enum!(RiskLevel {
    Low => "Low",
    Medium => "Medium",
    High => "High",
});

/// Row of the analytics store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRecord {
    /// Same identifier as the raw row
    pub earthquake_id: String,
    /// Event origin time
    pub occurred_at: DateTime<Utc>,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Hypocentre depth in kilometres
    pub depth_km: f64,
    /// Reported magnitude
    pub magnitude: f64,
    /// Magnitude scale, e.g. `ml` or `mww`
    pub magnitude_type: String,
    /// Free-text place description
    pub place: String,
    /// Country from the place rules, or `Other`
    pub country: String,
    /// Text after the last comma of the place
    pub region: String,
    /// Magnitude class
    pub magnitude_category: MagnitudeCategory,
    /// Depth class
    pub depth_category: DepthCategory,
    /// Combined risk
    pub risk_level: RiskLevel,
    /// English weekday name of `occurred_at` (UTC)
    pub day_of_week: String,
    /// Hour of `occurred_at`, 0-23 (UTC)
    pub hour_of_day: u32,
    /// Last time the transform touched this row
    pub transformed_at: DateTime<Utc>,
}

impl AnalyticsRecord {
    /// Same record with `transformed_at` blanked, for comparing derivations.
    #[must_use]
    pub fn derived_fields(&self) -> Self {
        Self {
            transformed_at: DateTime::<Utc>::UNIX_EPOCH,
            ..self.clone()
        }
    }
}

/// Row counts across the three stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    /// Rows in the raw store
    pub raw_events: u64,
    /// Rows in the load ledger
    pub load_attempts: u64,
    /// Rows in the analytics store
    pub analytics_records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_feed_window_dates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 1, 30, 0).unwrap();
        let window = FeedWindow::trailing(now, chrono::Duration::hours(24), 2.5);
        assert_eq!(window.start_date(), "2024-03-01");
        assert_eq!(window.end_date(), "2024-03-02");
    }

    #[test]
    fn test_extracted_event_keeps_bytes() {
        let json = r#"{ "type":"Feature",  "id":"us7000abcd", "properties":{"mag":4.5} }"#;
        let event = ExtractedEvent::from_json(json).unwrap();
        assert_eq!(event.id, "us7000abcd");
        assert_eq!(event.payload_str(), json);
    }

    #[test]
    fn test_extracted_event_requires_id() {
        assert!(ExtractedEvent::from_json(r#"{"properties":{}}"#).is_err());
    }

    #[test]
    fn test_category_text() {
        assert_eq!(MagnitudeCategory::Moderate.to_string(), "Moderate");
        assert_eq!("Deep".parse::<DepthCategory>(), Ok(DepthCategory::Deep));
        assert!("Extreme".parse::<RiskLevel>().is_err());
        assert_eq!("FAILED".parse::<LoadStatus>(), Ok(LoadStatus::Failed));
    }
}
