//! Time-windowed extraction from the upstream event feed.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{info, instrument, warn};

use crate::config::FeedConfig;
use crate::error::{PipelineError, Result};
use crate::models::{ExtractedEvent, FeedWindow};

/// Anything that can produce a batch of events for a window
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch every event in `window`, in feed order.
    async fn fetch(&self, window: &FeedWindow) -> Result<Vec<ExtractedEvent>>;
}

/// GeoJSON event feed client (USGS FDSN event service)
pub struct UsgsFeed {
    client: reqwest::Client,
    url: String,
    format: String,
}

impl UsgsFeed {
    /// Create a configured asynchronous HTTP client for the feed.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            format: config.format.clone(),
        })
    }

    fn query(&self, window: &FeedWindow) -> [(&'static str, String); 4] {
        [
            ("format", self.format.clone()),
            ("starttime", window.start_date()),
            ("endtime", window.end_date()),
            ("minmagnitude", window.min_magnitude.to_string()),
        ]
    }
}

#[async_trait]
impl EventSource for UsgsFeed {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self, window: &FeedWindow) -> Result<Vec<ExtractedEvent>> {
        info!(
            start = %window.start,
            end = %window.end,
            min_magnitude = window.min_magnitude,
            "Fetching earthquake data"
        );

        let body = self
            .client
            .get(&self.url)
            .query(&self.query(window))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let events = parse_feature_collection(&body)?;
        info!(count = events.len(), "Successfully extracted earthquakes");
        Ok(events)
    }
}

#[derive(Deserialize)]
struct FeatureCollection<'a> {
    #[serde(borrow)]
    features: Option<Vec<&'a RawValue>>,
}

/// Split a GeoJSON feature collection into events, keeping each feature's bytes.
///
/// A missing `features` array yields an empty batch; a body that is not JSON or a
/// feature without a string `id` is an invalid response.
pub fn parse_feature_collection(body: &str) -> Result<Vec<ExtractedEvent>> {
    let collection: FeatureCollection<'_> = serde_json::from_str(body)
        .map_err(|e| PipelineError::invalid_response(format!("not a feature collection: {e}")))?;

    let Some(features) = collection.features else {
        warn!("Feed response has no features array");
        return Ok(Vec::new());
    };

    features
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            ExtractedEvent::from_raw(raw.to_owned())
                .map_err(|e| PipelineError::invalid_response(format!("feature {index}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_preserves_feature_bytes() {
        let body = r#"{"type":"FeatureCollection","features":[{"id":"a1", "properties":{"mag":2.6}},{"id":"b2","properties":{}}]}"#;
        let events = parse_feature_collection(body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "a1");
        assert_eq!(events[0].payload_str(), r#"{"id":"a1", "properties":{"mag":2.6}}"#);
        assert_eq!(events[1].id, "b2");
    }

    #[test]
    fn test_parse_missing_features_is_empty() {
        let events = parse_feature_collection(r#"{"type":"FeatureCollection"}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_feature_collection("<html>503</html>").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[test]
    fn test_parse_rejects_feature_without_id() {
        assert!(parse_feature_collection(r#"{"features":[{"properties":{}}]}"#).is_err());
    }

    #[test]
    fn test_query_parameters() {
        let feed = UsgsFeed::new(&crate::config::AppConfig::default().feed).unwrap();
        let window = FeedWindow {
            start: Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap(),
            min_magnitude: 2.5,
        };
        let query = feed.query(&window);
        assert_eq!(query[0], ("format", "geojson".to_string()));
        assert_eq!(query[1], ("starttime", "2024-05-01".to_string()));
        assert_eq!(query[2], ("endtime", "2024-05-02".to_string()));
        assert_eq!(query[3], ("minmagnitude", "2.5".to_string()));
    }
}
