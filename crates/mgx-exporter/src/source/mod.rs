//! Upstream record sources
//!
//! The exporter walks a listing of sequence files, one per sample, ordered by
//! project, and downloads each as a byte stream.

pub mod shock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;

use crate::error::Result;

pub use shock::ShockClient;

/// Raw bytes of one downloaded sequence file
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One listed sequence file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub node_id: String,
    pub project_id: String,
    pub sample_id: String,
}

/// Paginated listing of sequence files, ordered by project
#[async_trait]
pub trait NodeSource: Send {
    /// Next listed item, `None` once the listing is exhausted
    async fn next_item(&mut self) -> Result<Option<SourceItem>>;

    /// Download the file behind `node_id`
    async fn fetch(&self, node_id: &str) -> Result<ByteStream>;
}
