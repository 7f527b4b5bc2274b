//! Export ledger (`export.index`)
//!
//! An ordered list of per-project coordinate ranges. Each entry names the
//! first and last record of one project as `(file ordinal, record number)`
//! pairs, record numbers starting at 1 in every file. Entries are appended
//! during export and only ever removed from the tail by recovery.
//!
//! The snapshot is a compact JSON array:
//!
//! ```json
//! [{"p":"mgp1","m":["mgm1","mgm2"],"sf":1,"sr":1,"ef":3,"er":40,"c":true}]
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use crate::error::Result;

/// Coordinates and provenance of one project's records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "p")]
    pub project: String,

    /// Sample IDs in first-seen order, no duplicates
    #[serde(rename = "m", default, deserialize_with = "null_as_empty")]
    pub samples: Vec<String>,

    #[serde(rename = "sf")]
    pub start_file: u32,

    #[serde(rename = "sr")]
    pub start_record: u64,

    /// Zero until the entry is completed
    #[serde(rename = "ef")]
    pub end_file: u32,

    /// Zero until the entry is completed
    #[serde(rename = "er")]
    pub end_record: u64,

    #[serde(rename = "c")]
    pub completed: bool,
}

/// Older snapshots wrote `"m": null` for entries without samples
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl LedgerEntry {
    /// An entry that has not seen any record yet
    pub fn is_empty(&self) -> bool {
        self.project.is_empty()
    }

    /// Initialise an empty entry with its first record
    pub fn start(&mut self, project: &str, sample: &str, file: u32, record: u64) {
        self.project = project.to_string();
        self.add_sample(sample);
        self.start_file = file;
        self.start_record = record;
    }

    /// Append a sample ID unless already present
    pub fn add_sample(&mut self, sample: &str) {
        if !sample.is_empty() && !self.samples.iter().any(|s| s == sample) {
            self.samples.push(sample.to_string());
        }
    }

    /// Close the entry at its last record
    pub fn finalize(&mut self, sample: &str, file: u32, record: u64) {
        self.add_sample(sample);
        self.end_file = file;
        self.end_record = record;
        self.completed = true;
    }

    /// File ordinals spanned by this entry; empty while the entry is open
    pub fn file_range(&self) -> RangeInclusive<u32> {
        self.start_file.max(1)..=self.end_file
    }
}

/// Ordered list of ledger entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot; a missing file is an empty ledger
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist the snapshot, replacing the previous one atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec(self)?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut LedgerEntry> {
        self.entries.last_mut()
    }

    /// Whether any entry belongs to `project`
    pub fn contains(&self, project: &str) -> bool {
        self.entries.iter().any(|e| e.project == project)
    }

    /// Unique file ordinals referenced from `from` onward, in order of first
    /// appearance
    pub fn file_numbers(&self, from: usize) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for entry in self.entries.iter().skip(from) {
            for ordinal in entry.file_range() {
                if seen.insert(ordinal) {
                    files.push(ordinal);
                }
            }
        }
        files
    }

    /// First entry not marked completed, as `(1-based position, project)`
    pub fn first_incomplete(&self) -> Option<(usize, &str)> {
        self.entries
            .iter()
            .position(|e| !e.completed)
            .map(|i| (i + 1, self.entries[i].project.as_str()))
    }

    /// Every entry is completed
    pub fn is_complete(&self) -> bool {
        self.first_incomplete().is_none()
    }

    /// Candidates (file ordinals found on disk) the ledger does not reference
    pub fn unindexed(&self, candidates: &[u32]) -> Vec<u32> {
        let indexed: HashSet<u32> = self.file_numbers(0).into_iter().collect();
        candidates
            .iter()
            .copied()
            .filter(|n| !indexed.contains(n))
            .collect()
    }

    /// Every candidate is referenced by some entry
    pub fn has_files(&self, candidates: &[u32]) -> bool {
        self.unindexed(candidates).is_empty()
    }

    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    /// The open tail entry, appending an empty one if the tail is completed
    pub fn open_entry(&mut self) -> &mut LedgerEntry {
        if self.entries.last().is_none_or(|e| e.completed) {
            self.entries.push(LedgerEntry::default());
        }
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Project of the open tail entry once it has seen a record
    pub fn open_project(&self) -> Option<&str> {
        self.entries
            .last()
            .filter(|e| !e.completed && !e.is_empty())
            .map(|e| e.project.as_str())
    }

    /// Drop a trailing entry that never received a record
    pub fn discard_empty_tail(&mut self) {
        if self.entries.last().is_some_and(|e| !e.completed && e.is_empty()) {
            self.entries.pop();
        }
    }

    /// Remove the last `count` entries
    pub fn remove_last(&mut self, count: usize) {
        let keep = self.entries.len().saturating_sub(count);
        self.entries.truncate(keep);
    }
}

/// A record arrived for a project other than the open entry's
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record for project {found} while project {expected} is open")]
pub struct ProtocolViolation {
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Clone)]
struct LastRecord {
    sample: String,
    file: u32,
    record: u64,
}

/// Tracks the open entry as records are appended
///
/// Shared by the writer (live export) and index rebuilds so both produce the
/// same entries for the same sequence of records.
#[derive(Debug, Default)]
pub struct LedgerCursor {
    last: Option<LastRecord>,
}

impl LedgerCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that a record for `project` may join the open entry
    pub fn check(
        &self,
        ledger: &Ledger,
        project: &str,
    ) -> std::result::Result<(), ProtocolViolation> {
        match ledger.open_project() {
            Some(open) if open != project => Err(ProtocolViolation {
                expected: open.to_string(),
                found: project.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Account for a record written at `(file, record)`
    pub fn observe(
        &mut self,
        ledger: &mut Ledger,
        project: &str,
        sample: &str,
        file: u32,
        record: u64,
    ) -> std::result::Result<(), ProtocolViolation> {
        self.check(ledger, project)?;

        let entry = ledger.open_entry();
        if entry.is_empty() {
            entry.start(project, sample, file, record);
        } else if self.last.as_ref().is_none_or(|l| l.sample != sample) {
            entry.add_sample(sample);
        }

        match &mut self.last {
            Some(last) => {
                if last.sample != sample {
                    last.sample = sample.to_string();
                }
                last.file = file;
                last.record = record;
            },
            None => {
                self.last = Some(LastRecord {
                    sample: sample.to_string(),
                    file,
                    record,
                });
            },
        }
        Ok(())
    }

    /// Complete the open entry at the last observed record
    ///
    /// Returns `false` when the open entry has not seen a record.
    pub fn finalize(&mut self, ledger: &mut Ledger) -> bool {
        let Some(last) = self.last.take() else {
            return false;
        };
        match ledger.last_mut() {
            Some(entry) if !entry.completed && !entry.is_empty() => {
                entry.finalize(&last.sample, last.file, last.record);
                true
            },
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry(project: &str, sf: u32, sr: u64, ef: u32, er: u64) -> LedgerEntry {
        LedgerEntry {
            project: project.to_string(),
            samples: vec![format!("{}-s", project)],
            start_file: sf,
            start_record: sr,
            end_file: ef,
            end_record: er,
            completed: true,
        }
    }

    #[test]
    fn test_snapshot_format() {
        let mut ledger = Ledger::new();
        ledger.append(entry("mgp1", 1, 1, 2, 5));

        let json = serde_json::to_string(&ledger).unwrap();
        assert_eq!(
            json,
            r#"[{"p":"mgp1","m":["mgp1-s"],"sf":1,"sr":1,"ef":2,"er":5,"c":true}]"#
        );
    }

    #[test]
    fn test_load_accepts_null_samples() {
        let ledger: Ledger = serde_json::from_str(
            r#"[{"p":"","m":null,"sf":0,"sr":0,"ef":0,"er":0,"c":false}]"#,
        )
        .unwrap();
        assert!(ledger.entries()[0].samples.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.index");

        assert!(Ledger::load(&path).unwrap().is_empty());

        let mut ledger = Ledger::new();
        ledger.append(entry("mgp1", 1, 1, 1, 3));
        ledger.append(entry("mgp2", 1, 4, 3, 2));
        ledger.save(&path).unwrap();

        assert_eq!(Ledger::load(&path).unwrap(), ledger);
        assert!(!dir.path().join("export.index.tmp").exists());
    }

    #[test]
    fn test_file_numbers_unique_in_order() {
        let mut ledger = Ledger::new();
        ledger.append(entry("mgp1", 1, 1, 2, 7));
        ledger.append(entry("mgp2", 2, 8, 2, 9));
        ledger.append(entry("mgp3", 2, 10, 4, 1));

        assert_eq!(ledger.file_numbers(0), vec![1, 2, 3, 4]);
        assert_eq!(ledger.file_numbers(1), vec![2, 3, 4]);
        assert_eq!(ledger.file_numbers(3), Vec::<u32>::new());
    }

    #[test]
    fn test_open_entry_references_no_files() {
        let mut ledger = Ledger::new();
        ledger.append(entry("mgp1", 1, 1, 1, 2));
        ledger.open_entry().start("mgp2", "mgm3", 2, 1);

        assert_eq!(ledger.file_numbers(0), vec![1]);
        assert_eq!(ledger.first_incomplete(), Some((2, "mgp2")));
        assert!(!ledger.is_complete());
    }

    #[test]
    fn test_unindexed_files() {
        let mut ledger = Ledger::new();
        ledger.append(entry("mgp1", 1, 1, 2, 3));

        assert!(ledger.has_files(&[1, 2]));
        assert_eq!(ledger.unindexed(&[1, 2, 3]), vec![3]);
    }

    #[test]
    fn test_remove_last() {
        let mut ledger = Ledger::new();
        ledger.append(entry("mgp1", 1, 1, 1, 1));
        ledger.append(entry("mgp2", 1, 2, 1, 2));
        ledger.remove_last(1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains("mgp1"));
        assert!(!ledger.contains("mgp2"));
        ledger.remove_last(5);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_cursor_tracks_samples_and_coordinates() {
        let mut ledger = Ledger::new();
        let mut cursor = LedgerCursor::new();

        cursor.observe(&mut ledger, "mgp1", "mgm1", 1, 1).unwrap();
        cursor.observe(&mut ledger, "mgp1", "mgm1", 1, 2).unwrap();
        cursor.observe(&mut ledger, "mgp1", "mgm2", 2, 1).unwrap();
        cursor.observe(&mut ledger, "mgp1", "mgm1", 2, 2).unwrap();
        assert!(cursor.finalize(&mut ledger));

        let e = &ledger.entries()[0];
        assert_eq!(e.samples, vec!["mgm1", "mgm2"]);
        assert_eq!((e.start_file, e.start_record), (1, 1));
        assert_eq!((e.end_file, e.end_record), (2, 2));
        assert!(e.completed);

        // Nothing observed since the last finalize
        assert!(!cursor.finalize(&mut ledger));
    }

    #[test]
    fn test_cursor_rejects_foreign_project() {
        let mut ledger = Ledger::new();
        let mut cursor = LedgerCursor::new();
        cursor.observe(&mut ledger, "mgp1", "mgm1", 1, 1).unwrap();

        let err = cursor.observe(&mut ledger, "mgp2", "mgm9", 1, 2).unwrap_err();
        assert_eq!(err.expected, "mgp1");
        assert_eq!(ledger.entries()[0].samples, vec!["mgm1"]);
    }
}
