//! Shock object store client
//!
//! Lists metagenome sequence files of one pipeline stage, ordered by project,
//! and downloads them as streams.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ByteStream, NodeSource, SourceItem};
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};

// ============================================================================
// Shock Client Constants
// ============================================================================

/// Resource path of Shock nodes
pub const NODE_RESOURCE: &str = "node";

/// Connection timeout; downloads themselves are not bounded
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// One page of a node listing
#[derive(Debug, Deserialize)]
struct NodePage {
    #[serde(default)]
    data: Vec<ShockNode>,
    #[serde(default)]
    total_count: usize,
}

#[derive(Debug, Deserialize)]
struct ShockNode {
    id: Option<String>,
    attributes: Option<NodeAttributes>,
}

#[derive(Debug, Deserialize)]
struct NodeAttributes {
    project_id: Option<String>,
    id: Option<String>,
}

impl TryFrom<ShockNode> for SourceItem {
    type Error = ExportError;

    fn try_from(node: ShockNode) -> Result<Self> {
        match node {
            ShockNode {
                id: Some(node_id),
                attributes:
                    Some(NodeAttributes {
                        project_id: Some(project_id),
                        id: Some(sample_id),
                    }),
            } => Ok(SourceItem {
                node_id,
                project_id,
                sample_id,
            }),
            node => Err(ExportError::upstream(format!("invalid shock node: {:?}", node))),
        }
    }
}

/// Paginated Shock node listing
pub struct ShockClient {
    client: Client,
    base: Url,
    stage: String,
    project: Option<String>,
    page_size: usize,
    offset: usize,
    total: Option<usize>,
    buffer: VecDeque<SourceItem>,
    exhausted: bool,
}

impl ShockClient {
    /// Create a client listing `stage` files, optionally for one project
    pub fn new(
        base: Url,
        stage: impl Into<String>,
        project: Option<String>,
        page_size: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base,
            stage: stage.into(),
            project,
            page_size: page_size.max(1),
            offset: 0,
            total: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        Self::new(
            config.shock_host()?,
            config.stage.clone(),
            config.project.clone(),
            config.page_size,
        )
    }

    fn resource_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ExportError::config(format!("shock url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .push(NODE_RESOURCE)
            .extend(segments);
        Ok(url)
    }

    /// URL of the listing page starting at the current offset
    fn page_url(&self) -> Result<Url> {
        let mut url = self.resource_url(&[])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_key_only("query")
                .append_pair("type", "metagenome")
                .append_pair("stage_name", &self.stage)
                .append_pair("direction", "asc")
                .append_pair("order", "project_id");
            if let Some(project) = &self.project {
                query.append_pair("project_id", project);
            }
            query
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("offset", &self.offset.to_string());
        }
        Ok(url)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let url = self.page_url()?;
        debug!(url = %url, "Listing shock nodes");

        let page: NodePage = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.total = Some(page.total_count);
        if page.data.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        self.offset += page.data.len();
        for node in page.data {
            self.buffer.push_back(SourceItem::try_from(node)?);
        }
        Ok(())
    }
}

#[async_trait]
impl NodeSource for ShockClient {
    async fn next_item(&mut self) -> Result<Option<SourceItem>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted || self.total.is_some_and(|total| self.offset >= total) {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch(&self, node_id: &str) -> Result<ByteStream> {
        let mut url = self.resource_url(&[node_id])?;
        url.query_pairs_mut().append_key_only("download");
        debug!(url = %url, "Downloading shock node");

        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(Box::pin(response.bytes_stream().map_err(io::Error::other)))
    }
}
