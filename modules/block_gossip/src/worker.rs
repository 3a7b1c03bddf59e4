use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use pergamon_common::{Block, BlockHash, BlockSummary, Node, messages::GetBlockChunkedRequest};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::chunks::{self, AssembledContent, ChunkError};
use crate::compression::{self, CompressionAlgorithm};
use crate::configuration::RetryConfig;
use crate::download::{DownloadItem, Signal};
use crate::errors::GossipError;
use crate::metrics::Metrics;
use crate::relay::RelayEngine;
use crate::services::{Backend, GossipConnector};

/// One download in flight: fetches the block from the item's sources,
/// validates and stores it, and reports the outcome back to the scheduler.
///
/// The worker never touches the item map directly; it reads `sources` and
/// `relay` snapshots (which may have widened since it started) and posts
/// signals for every state change.
pub(crate) struct Worker {
    pub(crate) hash: BlockHash,
    pub(crate) summary: BlockSummary,
    pub(crate) items: Arc<DashMap<BlockHash, DownloadItem>>,
    pub(crate) signals: mpsc::Sender<Signal>,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) connector: Arc<dyn GossipConnector>,
    pub(crate) relay: RelayEngine,
    pub(crate) retries: RetryConfig,
    pub(crate) fetch_permits: Arc<Semaphore>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Worker {
    pub(crate) async fn run(self) {
        let outcome = self.download_from_any_source().await;
        let signal = match outcome {
            Ok(()) => {
                if self.relay_requested() {
                    let _round = self.relay.relay(vec![self.hash]).await;
                }
                Signal::Success { hash: self.hash }
            }
            Err(error) => Signal::Failure {
                hash: self.hash,
                error,
            },
        };
        if self.signals.send(signal).await.is_err() {
            debug!(hash = %self.hash, "scheduler is gone, dropping worker result");
        }
    }

    /// Outer loop: try each advertised source in turn. A fresh source starts
    /// with a fresh attempt counter; the first error encountered is the one
    /// reported after exhaustion.
    async fn download_from_any_source(&self) -> Result<(), GossipError> {
        let mut attempted: HashSet<Vec<u8>> = HashSet::new();
        let mut first_error = None;
        while let Some(source) = self.next_source(&attempted) {
            attempted.insert(source.id.clone());
            match self.download_from(&source).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(hash = %self.hash, source = %source,
                        "giving up on source: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }
        // An item always carries at least one source, so the fallback is
        // unreachable in practice.
        Err(first_error.unwrap_or(GossipError::Transport {
            peer: String::new(),
            message: "no sources advertised this block".to_string(),
        }))
    }

    /// The sources set may have grown since the worker started; consult the
    /// live item for peers not yet tried.
    fn next_source(&self, attempted: &HashSet<Vec<u8>>) -> Option<Node> {
        let item = self.items.get(&self.hash)?;
        item.sources.iter().find(|source| !attempted.contains(&source.id)).cloned()
    }

    /// Inner loop: retry one source with exponential backoff.
    async fn download_from(&self, source: &Node) -> Result<(), GossipError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt_download(source).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    if attempt >= self.retries.max_retries {
                        return Err(error);
                    }
                    let delay = self.retries.delay(attempt)?;
                    self.metrics.record_download_failed();
                    debug!(hash = %self.hash, source = %source, attempt, ?delay,
                        "download attempt failed, backing off: {error}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_download(&self, source: &Node) -> Result<(), GossipError> {
        let block = self.fetch(source).await?;
        if block.summary != self.summary {
            return Err(GossipError::InvalidChunks {
                source_node: source.to_string(),
                reason: format!("peer sent a block that does not match the summary of {}", self.hash),
            });
        }
        self.backend.validate_block(&block).await?;
        // Blocks precede summaries so a crash between the two stores leaves
        // a recoverable state.
        self.backend.store_block(&block).await?;
        self.backend.store_block_summary(&block.summary).await?;
        Ok(())
    }

    /// Chunked fetch, gated by the global fetch permit; decompression and
    /// parsing happen after the permit is released.
    async fn fetch(&self, source: &Node) -> Result<Block, GossipError> {
        let content = {
            let _permit = self
                .fetch_permits
                .acquire()
                .await
                .map_err(|_| GossipError::Cancelled)?;
            self.metrics.inc_fetches_ongoing();
            let result = self.fetch_chunks(source).await;
            self.metrics.dec_fetches_ongoing();
            result?
        };
        let AssembledContent {
            compression: algorithm,
            original_content_length,
            bytes,
        } = content;
        let bytes = compression::decompress(algorithm, bytes, original_content_length as usize)
            .map_err(|error| GossipError::InvalidChunks {
                source_node: source.to_string(),
                reason: error.to_string(),
            })?;
        Block::from_bytes(&bytes).map_err(|error| GossipError::InvalidChunks {
            source_node: source.to_string(),
            reason: format!("block decoding failed: {error}"),
        })
    }

    async fn fetch_chunks(&self, source: &Node) -> Result<AssembledContent, GossipError> {
        let mut service = self
            .connector
            .connect(source)
            .await
            .map_err(|error| GossipError::transport(source, error))?;
        let stream = service
            .get_block_chunked(GetBlockChunkedRequest {
                block_hash: self.hash,
                accepted_compression_algorithms: CompressionAlgorithm::accepted(),
            })
            .await
            .map_err(|error| GossipError::transport(source, error))?;
        chunks::assemble(stream).await.map_err(|error| match error {
            ChunkError::Transport(error) => GossipError::transport(source, error),
            violation => GossipError::InvalidChunks {
                source_node: source.to_string(),
                reason: violation.to_string(),
            },
        })
    }

    /// Sticky-OR flag read back from the live item: a merge after the worker
    /// started can still turn relaying on.
    fn relay_requested(&self) -> bool {
        self.items.get(&self.hash).map(|item| item.relay).unwrap_or(false)
    }
}
