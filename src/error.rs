//! Error types for the exchange reader.

use thiserror::Error;

/// Main error type for reader operations.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unsupported message format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid filter pattern {pattern:?}: {source}")]
    PatternCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Write to sink {sink} failed: {source}")]
    SinkWrite {
        sink: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<serde_json::Error> for ReaderError {
    fn from(e: serde_json::Error) -> Self {
        ReaderError::Decode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ReaderError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ReaderError::Decode(e.to_string())
    }
}

/// Result type for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;
