//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! The DDL itself lives in `migrations/`.

/// Raw store: verbatim feed features, append-only
pub mod raw_earthquakes {
    /// Table name
    pub const TABLE: &str = "raw_earthquakes";
    /// Primary key column, the feed's event identifier
    pub const EARTHQUAKE_ID: &str = "earthquake_id";
    /// Feature JSON exactly as received
    pub const RAW_PAYLOAD: &str = "raw_payload";
    /// Source tag column
    pub const SOURCE: &str = "source";
    /// Insert timestamp column
    pub const EXTRACTED_AT: &str = "extracted_at";
}

/// Load ledger: one row per loader invocation
pub mod load_history {
    /// Table name
    pub const TABLE: &str = "load_history";
    /// Primary key column
    pub const ID: &str = "id";
    /// Load timestamp column
    pub const LOAD_DATE: &str = "load_date";
    /// Newly inserted row count column
    pub const RECORDS_LOADED: &str = "records_loaded";
    /// SUCCESS or FAILED
    pub const STATUS: &str = "status";
    /// Captured error text for failed loads
    pub const ERROR_MESSAGE: &str = "error_message";
}

/// Analytics store: derived, classified events
pub mod analytics_earthquakes {
    /// Table name
    pub const TABLE: &str = "analytics_earthquakes";
    /// Primary key column, matches the raw store key
    pub const EARTHQUAKE_ID: &str = "earthquake_id";
    /// Event time column
    pub const OCCURRED_AT: &str = "occurred_at";
    /// Latitude column
    pub const LATITUDE: &str = "latitude";
    /// Longitude column
    pub const LONGITUDE: &str = "longitude";
    /// Depth in kilometres column
    pub const DEPTH_KM: &str = "depth_km";
    /// Magnitude column
    pub const MAGNITUDE: &str = "magnitude";
    /// Magnitude type column (ml, mb, mww, ...)
    pub const MAGNITUDE_TYPE: &str = "magnitude_type";
    /// Free-text place column
    pub const PLACE: &str = "place";
    /// Country column
    pub const COUNTRY: &str = "country";
    /// Region column
    pub const REGION: &str = "region";
    /// Magnitude category column
    pub const MAGNITUDE_CATEGORY: &str = "magnitude_category";
    /// Depth category column
    pub const DEPTH_CATEGORY: &str = "depth_category";
    /// Risk level column
    pub const RISK_LEVEL: &str = "risk_level";
    /// Weekday name column
    pub const DAY_OF_WEEK: &str = "day_of_week";
    /// Hour of day column
    pub const HOUR_OF_DAY: &str = "hour_of_day";
    /// Last derivation timestamp column
    pub const TRANSFORMED_AT: &str = "transformed_at";
}
