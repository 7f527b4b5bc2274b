//! Error types shared by the exporter crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, MgxError>;

/// Main error type for the shared library
#[derive(Error, Debug)]
pub enum MgxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid sequence header: {0}")]
    InvalidHeader(String),
}

impl MgxError {
    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create an invalid header error
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        Self::InvalidHeader(msg.into())
    }
}
