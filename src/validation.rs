use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::FeedWindow;

/// Lowest magnitude the feed reports (microseismic events go slightly negative)
pub const MIN_MAGNITUDE: f64 = -2.0;
/// Upper bound for a magnitude filter
pub const MAX_MAGNITUDE: f64 = 10.0;

/// Validation utilities for command-line input
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Parse a `YYYY-MM-DD` date as midnight UTC
    pub fn parse_date(input: &str) -> Result<DateTime<Utc>> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("Date cannot be empty"));
        }

        let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map_err(|e| anyhow!("Invalid date '{}': expected YYYY-MM-DD ({})", trimmed, e))?;
        date.and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| anyhow!("Invalid date '{}'", trimmed))
    }

    /// Validate a magnitude filter
    pub fn validate_magnitude(magnitude: f64) -> Result<()> {
        if !magnitude.is_finite() {
            return Err(anyhow!("Magnitude must be a finite number"));
        }

        if !(MIN_MAGNITUDE..=MAX_MAGNITUDE).contains(&magnitude) {
            return Err(anyhow!(
                "Magnitude {} out of range ({} to {})",
                magnitude,
                MIN_MAGNITUDE,
                MAX_MAGNITUDE
            ));
        }

        Ok(())
    }

    /// Validate an extraction window
    pub fn validate_window(window: &FeedWindow, now: DateTime<Utc>) -> Result<()> {
        if window.start >= window.end {
            return Err(anyhow!(
                "Window start {} must be before end {}",
                window.start,
                window.end
            ));
        }

        if window.start > now {
            return Err(anyhow!("Window start {} is in the future", window.start));
        }

        // The feed only sees calendar dates, so the window must span at least one
        if window.start_date() >= window.end_date() {
            return Err(anyhow!(
                "Window {} to {} covers no full feed day",
                window.start_date(),
                window.end_date()
            ));
        }

        Self::validate_magnitude(window.min_magnitude)
    }

    /// Build a window from optional CLI dates, falling back to the trailing lookback.
    pub fn build_window(
        start: Option<&str>,
        end: Option<&str>,
        min_magnitude: f64,
        lookback: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<FeedWindow> {
        let end = end.map(Self::parse_date).transpose()?.unwrap_or(now);
        let start = match start {
            Some(start) => Self::parse_date(start)?,
            None => end.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC),
        };

        let window = FeedWindow {
            start,
            end,
            min_magnitude,
        };
        Self::validate_window(&window, now)?;
        Ok(window)
    }

    /// Validate a listing limit
    pub fn validate_limit(limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(anyhow!("Limit must be greater than 0"));
        }

        if limit > 10_000 {
            return Err(anyhow!("Limit too large (max 10000)"));
        }

        Ok(())
    }
}
