//! Export directory layout
//!
//! ```text
//! <export dir>/
//!   export.index        ledger snapshot
//!   1.fasta.gz          first output file
//!   2.fasta.gz
//!   2.fasta.gz.temp     only while a truncation is in progress
//! ```

use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Suffix of every numbered output file
pub const FILE_SUFFIX: &str = ".fasta.gz";

/// Name of the ledger snapshot file
pub const INDEX_FILE: &str = "export.index";

/// Suffix of the copy kept while an output file is being truncated
pub const TEMP_SUFFIX: &str = ".temp";

/// Paths inside one export directory
#[derive(Debug, Clone)]
pub struct ExportLayout {
    root: PathBuf,
}

impl ExportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the export directory if missing
    pub fn create(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn file_path(&self, ordinal: u32) -> PathBuf {
        self.root.join(format!("{}{}", ordinal, FILE_SUFFIX))
    }

    pub fn temp_path(&self, ordinal: u32) -> PathBuf {
        self.root.join(format!("{}{}{}", ordinal, FILE_SUFFIX, TEMP_SUFFIX))
    }

    /// Ordinals of the output files present on disk, ascending
    pub fn export_files(&self) -> io::Result<Vec<u32>> {
        self.scan(FILE_SUFFIX)
    }

    /// Ordinals with a `<n>.fasta.gz.temp` copy left by a truncation, ascending
    pub fn temp_files(&self) -> io::Result<Vec<u32>> {
        self.scan(&format!("{}{}", FILE_SUFFIX, TEMP_SUFFIX))
    }

    fn scan(&self, suffix: &str) -> io::Result<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ordinals = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(suffix) else {
                continue;
            };
            match parse_stem(stem) {
                Some(ordinal) => ordinals.push(ordinal),
                None => warn!(file = %name, "Ignoring export file without a numeric name"),
            }
        }

        ordinals.sort_unstable();
        Ok(ordinals)
    }

    /// Ordinals whose output file does not exist
    pub fn missing_files(&self, ordinals: &[u32]) -> Vec<u32> {
        ordinals
            .iter()
            .copied()
            .filter(|&n| !self.file_path(n).is_file())
            .collect()
    }

    /// Size of an output file, `None` if it does not exist
    pub fn file_size(&self, ordinal: u32) -> io::Result<Option<u64>> {
        match std::fs::metadata(self.file_path(ordinal)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an output file, tolerating its absence
    pub fn remove_file(&self, ordinal: u32) -> io::Result<()> {
        match std::fs::remove_file(self.file_path(ordinal)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Ordinal of a `<n>.fasta.gz` file name
pub fn parse_ordinal(name: &str) -> Option<u32> {
    parse_stem(name.strip_suffix(FILE_SUFFIX)?)
}

fn parse_stem(stem: &str) -> Option<u32> {
    stem.parse().ok().filter(|&n| n > 0)
}

/// Display helper for lists of ordinals
pub fn describe_files(layout: &ExportLayout, ordinals: &[u32]) -> String {
    ordinals
        .iter()
        .map(|&n| layout.file_path(n).display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordinal() {
        assert_eq!(parse_ordinal("12.fasta.gz"), Some(12));
        assert_eq!(parse_ordinal("0.fasta.gz"), None);
        assert_eq!(parse_ordinal("abc.fasta.gz"), None);
        assert_eq!(parse_ordinal("3.fasta.gz.temp"), None);
    }

    #[test]
    fn test_export_files_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExportLayout::new(dir.path());
        for n in [10, 2, 1] {
            std::fs::write(layout.file_path(n), b"").unwrap();
        }
        std::fs::write(layout.temp_path(3), b"").unwrap();
        std::fs::write(layout.index_path(), b"[]").unwrap();

        assert_eq!(layout.export_files().unwrap(), vec![1, 2, 10]);
        assert_eq!(layout.missing_files(&[1, 4]), vec![4]);
    }

    #[test]
    fn test_temp_files_listed_separately() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExportLayout::new(dir.path());
        std::fs::write(layout.file_path(1), b"").unwrap();
        std::fs::write(layout.temp_path(12), b"").unwrap();
        std::fs::write(layout.temp_path(3), b"").unwrap();
        std::fs::write(dir.path().join("notes.temp"), b"").unwrap();

        assert_eq!(layout.temp_files().unwrap(), vec![3, 12]);
        assert_eq!(layout.export_files().unwrap(), vec![1]);
    }

    #[test]
    fn test_missing_directory_has_no_files() {
        let layout = ExportLayout::new("/nonexistent/mgx-export");
        assert!(layout.export_files().unwrap().is_empty());
    }
}
