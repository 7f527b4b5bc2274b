//! MGX Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the MG-RAST exporter.
//!
//! # Overview
//!
//! - **Error Handling**: [`MgxError`] and the crate [`Result`] alias
//! - **Sequence Codec**: streaming FASTA decoding and encoding ([`fasta`])
//! - **Logging**: `tracing` subscriber setup shared by all binaries
//!
//! # Example
//!
//! ```no_run
//! use mgx_common::fasta::{Compression, FastaReader};
//! use mgx_common::Result;
//!
//! fn count_records(path: &str) -> Result<usize> {
//!     let file = std::fs::File::open(path)?;
//!     let mut count = 0;
//!     for record in FastaReader::new(file, Compression::Gzip) {
//!         record?;
//!         count += 1;
//!     }
//!     Ok(count)
//! }
//! ```

pub mod error;
pub mod fasta;
pub mod logging;

// Re-export commonly used types
pub use error::{MgxError, Result};
pub use fasta::SequenceRecord;
