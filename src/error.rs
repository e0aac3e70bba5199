//! Error types shared by every layer of the client
//!
//! Format and schema errors always surface to the caller. Transport errors are
//! recovered by the orchestrator when the cache can stand in for the network.
//! Cache write failures never reach the caller; they are logged and the stream
//! continues without caching.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the HAPI client
#[derive(Debug, Error)]
pub enum HapiError {
    /// Malformed time string or record line
    #[error("Format error: {0}")]
    Format(String),

    /// Malformed or unsupported info document
    #[error("Schema error: {0}")]
    Schema(String),

    /// A CSV field could not be read as a number
    #[error("Not a number: '{value}'")]
    NumberFormat { value: String },

    /// Network failure with no usable fallback
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered, but not with something usable
    #[error("Server error {code}: {message}")]
    Protocol { code: i32, message: String },

    /// A JSON document could not be parsed
    #[error("Failed to parse JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// A cache file could not be created, written or installed
    #[error("Cache error at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a record or line stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `next_record` was called after the last record
    #[error("No more records")]
    Exhausted,
}

impl HapiError {
    /// Shorthand for a protocol error that did not come with a HAPI status code
    pub fn protocol(message: impl Into<String>) -> Self {
        HapiError::Protocol {
            code: -1,
            message: message.into(),
        }
    }

    /// Wraps an I/O error with the cache path it concerns
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HapiError::CacheIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HapiError>;
