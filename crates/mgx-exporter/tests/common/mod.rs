//! Shared helpers for exporter integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use mgx_common::fasta::{Compression, FastaReader};
use mgx_exporter::error::{ExportError, Result};
use mgx_exporter::layout::ExportLayout;
use mgx_exporter::source::{ByteStream, NodeSource, SourceItem};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io;

/// How a stored file is served
#[derive(Debug, Clone)]
enum Serve {
    Complete,
    /// Serve this many bytes, then fail the stream
    FailAfter(usize),
    /// Fail the fetch request itself
    Refuse,
}

/// In-memory listing of sequence files
#[derive(Default)]
pub struct MemorySource {
    items: VecDeque<SourceItem>,
    files: HashMap<String, (Vec<u8>, Serve)>,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            chunk_size: 7,
            ..Self::default()
        }
    }

    /// List a sample file holding `count` records named `<sample>_<i>`
    pub fn sample(mut self, project: &str, sample: &str, count: usize) -> Self {
        self.push(project, sample, fasta(sample, count), Serve::Complete);
        self
    }

    /// List a sample file whose download breaks after `bytes` bytes
    pub fn broken_sample(
        mut self,
        project: &str,
        sample: &str,
        count: usize,
        bytes: usize,
    ) -> Self {
        self.push(project, sample, fasta(sample, count), Serve::FailAfter(bytes));
        self
    }

    /// List a sample file whose download is refused
    pub fn refused_sample(mut self, project: &str, sample: &str) -> Self {
        self.push(project, sample, Vec::new(), Serve::Refuse);
        self
    }

    fn push(&mut self, project: &str, sample: &str, data: Vec<u8>, serve: Serve) {
        let node_id = format!("node-{}", self.files.len() + 1);
        self.items.push_back(SourceItem {
            node_id: node_id.clone(),
            project_id: project.to_string(),
            sample_id: sample.to_string(),
        });
        self.files.insert(node_id, (data, serve));
    }
}

#[async_trait]
impl NodeSource for MemorySource {
    async fn next_item(&mut self) -> Result<Option<SourceItem>> {
        Ok(self.items.pop_front())
    }

    async fn fetch(&self, node_id: &str) -> Result<ByteStream> {
        let (data, serve) = self
            .files
            .get(node_id)
            .ok_or_else(|| ExportError::upstream(format!("unknown node {}", node_id)))?;

        let (served, fail) = match serve {
            Serve::Complete => (data.as_slice(), false),
            Serve::FailAfter(n) => (&data[..(*n).min(data.len())], true),
            Serve::Refuse => return Err(ExportError::upstream("download refused")),
        };

        let mut chunks: Vec<io::Result<Bytes>> = served
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if fail {
            chunks.push(Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")));
        }
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// FASTA text with `count` lowercase records named `<sample>_<i>`
pub fn fasta(sample: &str, count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 1..=count {
        out.extend_from_slice(format!(">{}_{} len=8\nacgt\nacgt\n", sample, i).as_bytes());
    }
    out
}

/// Identifiers stored in an export file
pub fn read_ids(layout: &ExportLayout, ordinal: u32) -> Vec<String> {
    let file = File::open(layout.file_path(ordinal)).unwrap();
    FastaReader::new(file, Compression::Gzip)
        .map(|r| r.unwrap().id_str().into_owned())
        .collect()
}

/// Identifiers across every export file, in file order
pub fn read_all_ids(layout: &ExportLayout) -> Vec<String> {
    layout
        .export_files()
        .unwrap()
        .into_iter()
        .flat_map(|n| read_ids(layout, n))
        .collect()
}
