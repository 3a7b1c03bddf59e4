//! Contracts consumed by the gossip core: the local block store, peer
//! discovery, and the gossip RPC layer. The node process provides the
//! implementations; tests provide hand-rolled mocks.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use pergamon_common::{
    Block, BlockHash, BlockSummary, Node,
    messages::{Chunk, GetBlockChunkedRequest, NewBlocksRequest, NewBlocksResponse},
};
use tokio::sync::mpsc;

/// Validation or storage failure, classified by the backend implementation.
///
/// Transient errors are eligible for retry and fail-over; fatal errors abort
/// the download immediately.
#[derive(Debug)]
pub struct BackendError {
    pub fatal: bool,
    pub error: anyhow::Error,
}

impl BackendError {
    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self {
            fatal: false,
            error: error.into(),
        }
    }

    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        Self {
            fatal: true,
            error: error.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for BackendError {}

/// Local block validation and storage.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn has_block(&self, hash: &BlockHash) -> Result<bool, BackendError>;

    async fn validate_block(&self, block: &Block) -> Result<(), BackendError>;

    /// Store the full block. Must be called before `store_block_summary` so a
    /// crash between the two leaves a recoverable state.
    async fn store_block(&self, block: &Block) -> Result<(), BackendError>;

    async fn store_block_summary(&self, summary: &BlockSummary) -> Result<(), BackendError>;
}

/// Peer discovery snapshot, expected fresh within seconds.
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    /// Recently alive peers, closest first.
    async fn recently_alive_peers_ascending_distance(&self) -> Result<Vec<Node>>;
}

/// Frames of one chunked block transfer, in arrival order. Transport errors
/// mid-stream arrive as `Err` items; end of stream closes the channel.
pub type ChunkStream = mpsc::Receiver<Result<Chunk>>;

/// One open gossip session with a peer.
#[async_trait]
pub trait GossipService: Send {
    async fn new_blocks(&mut self, request: NewBlocksRequest) -> Result<NewBlocksResponse>;

    async fn get_block_chunked(&mut self, request: GetBlockChunkedRequest) -> Result<ChunkStream>;
}

/// Opens gossip sessions. Stubs are opened per use; pooling, if any, lives in
/// the implementation.
#[async_trait]
pub trait GossipConnector: Send + Sync {
    async fn connect(&self, peer: &Node) -> Result<Box<dyn GossipService>>;
}
