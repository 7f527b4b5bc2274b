//! Progress reporting for long-running exports

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}";

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Running count of records handed to the writer
pub struct ExportProgress {
    bar: ProgressBar,
    project: String,
    records: u64,
    bytes: u64,
}

impl ExportProgress {
    pub fn new() -> Self {
        Self::with_bar(create_spinner("starting export"))
    }

    /// Progress that draws nothing
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            project: String::new(),
            records: 0,
            bytes: 0,
        }
    }

    pub fn set_project(&mut self, project: &str) {
        project.clone_into(&mut self.project);
        self.redraw();
    }

    pub fn record(&mut self, encoded_len: usize) {
        self.records += 1;
        self.bytes += encoded_len as u64;
        if self.records % 1000 == 0 {
            self.redraw();
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn redraw(&self) {
        self.bar.set_message(format!(
            "{}: {} records ({})",
            self.project,
            self.records,
            format_bytes(self.bytes)
        ));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ExportProgress {
    fn default() -> Self {
        Self::new()
    }
}
