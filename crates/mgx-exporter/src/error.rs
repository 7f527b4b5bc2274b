//! Error types for the exporter
//!
//! Every variant that reaches the binary is fatal: it is printed as a single
//! line on stderr and the process exits with status 1. Per-record write
//! failures and protocol violations never surface here; the writer logs them
//! and drops the record.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Error, Debug)]
pub enum ExportError {
    /// Ledger and export directory disagree; run `clean` or `remove` first
    #[error("export set in bad state: {0}")]
    Validation(String),

    /// A record could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] mgx_common::MgxError),

    /// An output file could not be opened; nothing more can be written
    #[error("unable to open export file {}: {source}", path.display())]
    FatalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upstream listing returned something unusable
    #[error("source error: {0}")]
    Source(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The writer task ended before acknowledging a signal
    #[error("writer stopped unexpectedly")]
    WriterStopped,
}

impl ExportError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an upstream source error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
