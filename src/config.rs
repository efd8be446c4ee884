use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub feed: FeedConfig,
    pub transform: TransformConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// Upstream event feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    pub format: String,
    pub timeout_secs: u64,
    pub min_magnitude: f64,
    pub lookback_hours: u64,
    pub source_tag: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Trailing window over `extracted_at` that each transform re-scans
    pub window_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/earthquakes.db".to_string(),
                max_connections: 10,
                connection_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            feed: FeedConfig {
                url: "https://earthquake.usgs.gov/fdsnws/event/1/query".to_string(),
                format: "geojson".to_string(),
                timeout_secs: 30,
                min_magnitude: 2.5,
                lookback_hours: 24,
                source_tag: "USGS API".to_string(),
                user_agent: concat!("quake-elt/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            transform: TransformConfig { window_hours: 48 },
            retry: RetryConfig {
                max_attempts: 3,
                delay_secs: 300,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    /// Load configuration, optionally replacing the process environment with `env`.
    ///
    /// Keys use the `QUAKE_ELT` prefix and `__` between sections, e.g.
    /// `QUAKE_ELT_FEED__TIMEOUT_SECS=10`.
    pub fn load_with_env(env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        // Start with default values
        for (key, value) in AppConfig::default() {
            builder = builder.set_default(key, value)?;
        }

        let config = builder
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("quake-elt").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("QUAKE_ELT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.path.trim().is_empty() {
            return Err(anyhow::anyhow!("database path must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate feed config
        if !self.feed.url.starts_with("http://") && !self.feed.url.starts_with("https://") {
            return Err(anyhow::anyhow!("feed url must be http(s): {}", self.feed.url));
        }
        if self.feed.timeout_secs == 0 {
            return Err(anyhow::anyhow!("feed timeout_secs must be greater than 0"));
        }
        if !self.feed.min_magnitude.is_finite() {
            return Err(anyhow::anyhow!("feed min_magnitude must be a finite number"));
        }
        if self.feed.lookback_hours < 24 {
            return Err(anyhow::anyhow!(
                "feed lookback_hours must be at least 24, got {}",
                self.feed.lookback_hours
            ));
        }
        if self.feed.source_tag.trim().is_empty() {
            return Err(anyhow::anyhow!("feed source_tag must not be empty"));
        }

        // Validate transform config
        if self.transform.window_hours == 0 {
            return Err(anyhow::anyhow!("transform window_hours must be greater than 0"));
        }

        // Validate retry config
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be greater than 0"));
        }

        Ok(())
    }

    /// Get database path from environment or config
    pub fn get_database_path(&self) -> String {
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| self.database.path.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }

    /// Trailing transform window as a duration
    pub fn transform_window(&self) -> chrono::Duration {
        hours(self.transform.window_hours)
    }

    /// Default extraction lookback as a duration
    pub fn feed_lookback(&self) -> chrono::Duration {
        hours(self.feed.lookback_hours)
    }

    /// Delay between whole-run retries
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry.delay_secs)
    }
}

fn hours(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

impl IntoIterator for AppConfig {
    type Item = (String, config::Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, config::Value>;

    fn into_iter(self) -> Self::IntoIter {
        let mut map = HashMap::new();

        // Flatten the configuration into key-value pairs
        map.insert("database.path".to_string(), config::Value::from(self.database.path));
        map.insert("database.max_connections".to_string(), config::Value::from(self.database.max_connections));
        map.insert("database.connection_timeout_secs".to_string(), config::Value::from(self.database.connection_timeout_secs));

        map.insert("logging.level".to_string(), config::Value::from(self.logging.level));
        if let Some(file_path) = self.logging.file_path {
            map.insert("logging.file_path".to_string(), config::Value::from(file_path));
        }
        map.insert("logging.format".to_string(), config::Value::from(self.logging.format));

        map.insert("feed.url".to_string(), config::Value::from(self.feed.url));
        map.insert("feed.format".to_string(), config::Value::from(self.feed.format));
        map.insert("feed.timeout_secs".to_string(), config::Value::from(self.feed.timeout_secs));
        map.insert("feed.min_magnitude".to_string(), config::Value::from(self.feed.min_magnitude));
        map.insert("feed.lookback_hours".to_string(), config::Value::from(self.feed.lookback_hours));
        map.insert("feed.source_tag".to_string(), config::Value::from(self.feed.source_tag));
        map.insert("feed.user_agent".to_string(), config::Value::from(self.feed.user_agent));

        map.insert("transform.window_hours".to_string(), config::Value::from(self.transform.window_hours));

        map.insert("retry.max_attempts".to_string(), config::Value::from(self.retry.max_attempts));
        map.insert("retry.delay_secs".to_string(), config::Value::from(self.retry.delay_secs));

        map.into_iter()
    }
}
