//! Exporter configuration
//!
//! Values come from the command line, with `EXPORT_DIR` and `SHOCK_URL`
//! supplying defaults (see [`crate::Cli`]).

use crate::error::{ExportError, Result};
use std::path::PathBuf;
use url::Url;

// ============================================================================
// Exporter Configuration Constants
// ============================================================================

/// Pipeline stage exported when `--stage` is not given
pub const DEFAULT_STAGE: &str = "screen";

/// Output file size threshold when `--size` is not given (GB)
pub const DEFAULT_FILE_SIZE: u64 = 2;

/// Nodes requested per listing page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Messages buffered between the fetch loop and the writer
pub const RECORD_QUEUE_CAPACITY: usize = 1024;

const MEGABYTE: u64 = 1024 * 1024;
const GIGABYTE: u64 = 1024 * MEGABYTE;

/// Settings for one exporter invocation
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory holding the numbered export files and `export.index`
    pub directory: PathBuf,

    /// Shock server URL (export only)
    pub shock_url: Option<String>,

    /// Restrict the export to a single project
    pub project: Option<String>,

    /// Pipeline stage name used to select node files
    pub stage: String,

    /// Rotation size; GB normally, MB in debug mode
    pub file_size: u64,

    /// Debug mode: verbose logging and MB-sized rotation
    pub debug: bool,

    /// Exact rotation threshold in bytes, overriding `file_size`
    pub rotate_bytes: Option<u64>,

    /// Nodes requested per listing page
    pub page_size: usize,
}

impl ExportConfig {
    /// Create a config for `directory` with default values
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            shock_url: None,
            project: None,
            stage: DEFAULT_STAGE.to_string(),
            file_size: DEFAULT_FILE_SIZE,
            debug: false,
            rotate_bytes: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_shock_url(mut self, url: impl Into<String>) -> Self {
        self.shock_url = Some(url.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_rotate_bytes(mut self, bytes: u64) -> Self {
        self.rotate_bytes = Some(bytes);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Size in bytes at which the writer rotates to the next file
    pub fn rotate_threshold(&self) -> u64 {
        if let Some(bytes) = self.rotate_bytes {
            return bytes;
        }
        let unit = if self.debug { MEGABYTE } else { GIGABYTE };
        self.file_size.saturating_mul(unit)
    }

    /// Parsed Shock URL, defaulting the scheme to `http`
    pub fn shock_host(&self) -> Result<Url> {
        let raw = self
            .shock_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ExportError::config("shock url must be set (--shock or SHOCK_URL)"))?;

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };

        Url::parse(&with_scheme)
            .map_err(|e| ExportError::config(format!("shock url {} cannot be parsed: {}", raw, e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExportConfig::new("/data/export");
        assert_eq!(config.stage, DEFAULT_STAGE);
        assert_eq!(config.rotate_threshold(), 2 * GIGABYTE);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_debug_rotates_in_megabytes() {
        let config = ExportConfig::new("/tmp").with_file_size(5).with_debug(true);
        assert_eq!(config.rotate_threshold(), 5 * MEGABYTE);

        let config = config.with_rotate_bytes(1);
        assert_eq!(config.rotate_threshold(), 1);
    }

    #[test]
    fn test_shock_host_adds_scheme() {
        let config = ExportConfig::new("/tmp").with_shock_url("shock.mg-rast.org");
        assert_eq!(config.shock_host().unwrap().as_str(), "http://shock.mg-rast.org/");

        let config = ExportConfig::new("/tmp").with_shock_url("https://shock.example.org:8080");
        assert_eq!(config.shock_host().unwrap().scheme(), "https");
    }

    #[test]
    fn test_shock_host_required() {
        let config = ExportConfig::new("/tmp");
        assert!(matches!(config.shock_host(), Err(ExportError::Config(_))));
    }
}
