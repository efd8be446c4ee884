//! Error types for the quake-elt library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the pipeline. Every variant maps onto
//! one [`ErrorKind`], which is what the orchestrator looks at when a run fails.

use thiserror::Error;

/// Errors that can occur while extracting, loading or transforming events.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// HTTP request to the upstream feed failed (network, timeout, non-success status)
    #[error("Feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream feed answered with something that is not a usable event collection
    #[error("Invalid feed response: {0}")]
    InvalidResponse(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored raw payload is missing or mistypes a field the transform needs
    #[error("Malformed record {earthquake_id}: {reason}")]
    MalformedRecord {
        /// Identifier of the offending raw row
        earthquake_id: String,
        /// What was wrong with the payload
        reason: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or input
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure taxonomy used for run-level decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure, timeout or bad response from the upstream feed
    Transport,
    /// Store unavailable or an unexpected constraint violation
    Storage,
    /// A raw payload could not be derived
    MalformedRecord,
    /// Bad configuration or caller input
    Config,
}

impl PipelineError {
    /// Create a malformed record error.
    pub fn malformed(earthquake_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MalformedRecord {
            earthquake_id: earthquake_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid feed response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::InvalidResponse(_) => ErrorKind::Transport,
            Self::Database(_) | Self::Pool(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Storage,
            Self::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            Self::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// True when the feed request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(err) if err.is_timeout())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Storage => "storage",
            Self::MalformedRecord => "malformed_record",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// Convenience type alias for Result with PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
