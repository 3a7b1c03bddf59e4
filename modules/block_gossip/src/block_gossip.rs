//! Pergamon block gossip core: scheduling of block downloads from peers and
//! relay of block availability announcements.
//!
//! The subsystem is embedded by the node process, which supplies the local
//! peer identity and implementations of the consumed contracts (block store,
//! peer discovery, gossip RPC).

mod chunks;
mod compression;
mod configuration;
mod download;
mod errors;
mod handles;
mod metrics;
mod relay;
mod services;
mod worker;

use std::sync::Arc;

use pergamon_common::Node;

pub use crate::configuration::{GossipConfig, RetryConfig};
pub use crate::download::DownloadManager;
pub use crate::errors::GossipError;
pub use crate::handles::{DownloadHandle, WaitHandle};
pub use crate::metrics::Metrics;
pub use crate::relay::RelayEngine;
pub use crate::services::{
    Backend, BackendError, ChunkStream, GossipConnector, GossipService, PeerDiscovery,
};

/// The wired-up gossip core.
///
/// `downloads` schedules and deduplicates block downloads; `relay` announces
/// blocks the node already holds. Workers feed completed downloads back into
/// `relay` when asked to.
pub struct BlockGossip {
    pub downloads: DownloadManager,
    pub relay: RelayEngine,
    pub metrics: Arc<Metrics>,
}

impl BlockGossip {
    pub fn new(
        config: &GossipConfig,
        local: Node,
        backend: Arc<dyn Backend>,
        discovery: Arc<dyn PeerDiscovery>,
        connector: Arc<dyn GossipConnector>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let relay = RelayEngine::new(config, local, connector.clone(), discovery, metrics.clone());
        let downloads =
            DownloadManager::new(config, backend, connector, relay.clone(), metrics.clone());
        Self {
            downloads,
            relay,
            metrics,
        }
    }

    /// Stop scheduling and cancel in-flight downloads.
    pub async fn shutdown(&self) {
        self.downloads.shutdown().await;
    }
}
