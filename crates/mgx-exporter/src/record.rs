//! Records tagged with their project and sample
//!
//! Exported identifiers are rewritten to `project|sample|original` so the
//! ledger can be rebuilt from the output files alone.

use mgx_common::{MgxError, SequenceRecord};

/// Separator between the provenance fields of an exported identifier
pub const HEADER_SEPARATOR: u8 = b'|';

/// Prefix of MG-RAST project IDs
pub const PROJECT_PREFIX: &[u8] = b"mgp";

/// Prefix of MG-RAST metagenome IDs
pub const SAMPLE_PREFIX: &[u8] = b"mgm";

/// An encoded record on its way to the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRecord {
    /// Encoded `>id\nBODY\n` bytes
    pub bytes: Vec<u8>,
    /// Project ID, empty for replayed records
    pub project: String,
    /// Sample (metagenome) ID, empty for replayed records
    pub sample: String,
}

impl TaggedRecord {
    /// Tag a decoded record, prefixing its identifier with the provenance
    pub fn tag(project: &str, sample: &str, mut record: SequenceRecord) -> Self {
        let mut id = Vec::with_capacity(project.len() + sample.len() + record.id.len() + 2);
        id.extend_from_slice(project.as_bytes());
        id.push(HEADER_SEPARATOR);
        id.extend_from_slice(sample.as_bytes());
        id.push(HEADER_SEPARATOR);
        id.extend_from_slice(&record.id);
        record.id = id;

        Self {
            bytes: record.encode(),
            project: project.to_string(),
            sample: sample.to_string(),
        }
    }

    /// A record copied verbatim during truncation; carries no provenance
    pub fn replay(record: &SequenceRecord) -> Self {
        Self {
            bytes: record.encode(),
            project: String::new(),
            sample: String::new(),
        }
    }
}

/// Provenance recovered from an exported identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub project: String,
    pub sample: String,
}

impl RecordHeader {
    /// Parse `project|sample|original`
    pub fn parse(id: &[u8]) -> mgx_common::Result<Self> {
        let mut parts = id.splitn(3, |&b| b == HEADER_SEPARATOR);
        let (Some(project), Some(sample), Some(_)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(MgxError::invalid_header(format!(
                "expected project|sample|id, got {}",
                String::from_utf8_lossy(id)
            )));
        };

        if !project.starts_with(PROJECT_PREFIX) || !sample.starts_with(SAMPLE_PREFIX) {
            return Err(MgxError::invalid_header(format!(
                "expected {}...|{}...|id, got {}",
                String::from_utf8_lossy(PROJECT_PREFIX),
                String::from_utf8_lossy(SAMPLE_PREFIX),
                String::from_utf8_lossy(id)
            )));
        }

        Ok(Self {
            project: String::from_utf8_lossy(project).into_owned(),
            sample: String::from_utf8_lossy(sample).into_owned(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_rewrites_identifier() {
        let record = SequenceRecord::new("read_7 length=4", "acgt");
        let tagged = TaggedRecord::tag("mgp1", "mgm2", record);

        assert_eq!(tagged.bytes, b">mgp1|mgm2|read_7 length=4\nACGT\n");
        assert_eq!(tagged.project, "mgp1");
        assert_eq!(tagged.sample, "mgm2");
    }

    #[test]
    fn test_header_round_trip_keeps_pipes_in_original() {
        let header = RecordHeader::parse(b"mgp1|mgm2|a|b").unwrap();
        assert_eq!(header.project, "mgp1");
        assert_eq!(header.sample, "mgm2");
    }

    #[test]
    fn test_header_rejects_untagged_identifier() {
        assert!(RecordHeader::parse(b"read_7").is_err());
        assert!(RecordHeader::parse(b"mgp1|mgm2").is_err());
        assert!(RecordHeader::parse(b"|mgm2|x").is_err());
    }

    #[test]
    fn test_header_rejects_foreign_identifiers() {
        assert!(RecordHeader::parse(b"p1|mgm2|x").is_err());
        assert!(RecordHeader::parse(b"mgp1|m2|x").is_err());
        assert!(RecordHeader::parse(b"mgm1|mgp2|x").is_err());
    }
}
