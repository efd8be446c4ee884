//! Quake ELT - Earthquake Extract, Load, Transform
//!
//! A Rust library that pulls seismic events from the USGS event feed, keeps
//! them verbatim in a raw store, and derives an analytics table from them.
//!
//! # Features
//!
//! - Time-windowed extraction with a bounded request timeout
//! - Conflict-safe, transactional raw loading with an append-only ledger
//! - Windowed, idempotent re-derivation of classified analytics rows
//! - Whole-run retries driven by a configurable policy

/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Upstream feed extraction
pub mod extractor;
/// Raw store loading and ledger bookkeeping
pub mod loader;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Stage sequencing, run state and retries
pub mod pipeline;
/// Database schema definitions
pub mod schema;
/// Analytics derivation
pub mod transform;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use db::Database;
pub use error::{ErrorKind, PipelineError};
pub use extractor::{EventSource, UsgsFeed};
pub use loader::{LoadOutcome, Loader};
pub use models::{AnalyticsRecord, ExtractedEvent, FeedWindow, LoadAttempt, LoadStatus, RawEvent};
pub use pipeline::{Orchestrator, Pipeline, RetryPolicy, RunOutcome, RunState, Stage};
pub use transform::{TransformEngine, TransformOutcome};
