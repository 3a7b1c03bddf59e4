use std::sync::Arc;

use futures::future::join_all;
use pergamon_common::{BlockHash, Node, messages::NewBlocksRequest};
use rand::seq::SliceRandom;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::configuration::GossipConfig;
use crate::handles::WaitHandle;
use crate::metrics::Metrics;
use crate::services::{GossipConnector, PeerDiscovery};

/// Announces block availability to a bounded, randomized subset of live
/// peers.
///
/// Per hash it keeps contacting peers in parallel batches until
/// `relay_factor` of them accepted the block as new, the saturation cap on
/// contact attempts is hit, or the peer list is exhausted.
#[derive(Clone)]
pub struct RelayEngine {
    local: Node,
    connector: Arc<dyn GossipConnector>,
    discovery: Arc<dyn PeerDiscovery>,
    relay_factor: usize,
    max_to_try: usize,
    synchronous: bool,
    metrics: Arc<Metrics>,
}

impl RelayEngine {
    pub fn new(
        config: &GossipConfig,
        local: Node,
        connector: Arc<dyn GossipConnector>,
        discovery: Arc<dyn PeerDiscovery>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            local,
            connector,
            discovery,
            relay_factor: config.relay_factor,
            max_to_try: config.max_to_try(),
            synchronous: config.is_synchronous,
            metrics,
        }
    }

    /// Announce `hashes` to peers. The returned handle completes when the
    /// relay round has terminated; in synchronous mode the round runs before
    /// this returns and the handle is already complete.
    pub async fn relay(&self, hashes: Vec<BlockHash>) -> WaitHandle {
        if hashes.is_empty() {
            return WaitHandle::ready();
        }
        if self.synchronous {
            self.relay_round(hashes).await;
            WaitHandle::ready()
        } else {
            let (done, handle) = oneshot::channel();
            let engine = self.clone();
            tokio::spawn(async move {
                engine.relay_round(hashes).await;
                let _ = done.send(());
            });
            WaitHandle::new(handle)
        }
    }

    async fn relay_round(&self, hashes: Vec<BlockHash>) {
        join_all(hashes.into_iter().map(|hash| self.relay_hash(hash))).await;
    }

    async fn relay_hash(&self, hash: BlockHash) {
        let mut peers = match self.discovery.recently_alive_peers_ascending_distance().await {
            Ok(peers) => peers,
            Err(error) => {
                warn!(%hash, "could not list peers for relay: {error:#}");
                return;
            }
        };
        // Each hash gets its own shuffle, so different hashes visit
        // different peers.
        peers.shuffle(&mut rand::thread_rng());
        let mut peers = peers.into_iter();

        let mut relayed = 0;
        let mut contacted = 0;
        loop {
            let parallelism = (self.relay_factor - relayed).min(self.max_to_try - contacted);
            if parallelism == 0 {
                break;
            }
            let batch: Vec<Node> = peers.by_ref().take(parallelism).collect();
            if batch.is_empty() {
                break;
            }
            let outcomes = join_all(batch.iter().map(|peer| self.announce(peer, hash))).await;
            contacted += outcomes.len();
            relayed += outcomes.into_iter().filter(|accepted| *accepted).count();
        }
        debug!(%hash, relayed, contacted, "relay round for block finished");
    }

    /// Announce one hash to one peer. Errors count the peer as contacted but
    /// not relayed; they are logged and tallied, never re-thrown.
    async fn announce(&self, peer: &Node, hash: BlockHash) -> bool {
        match self.try_announce(peer, hash).await {
            Ok(true) => {
                self.metrics.record_relay_accepted();
                true
            }
            Ok(false) => {
                self.metrics.record_relay_rejected();
                false
            }
            Err(error) => {
                self.metrics.record_relay_failed();
                warn!(%hash, peer = %peer, "relay to peer failed: {error:#}");
                false
            }
        }
    }

    async fn try_announce(&self, peer: &Node, hash: BlockHash) -> anyhow::Result<bool> {
        let mut service = self.connector.connect(peer).await?;
        let response = service
            .new_blocks(NewBlocksRequest {
                sender: self.local.clone(),
                block_hashes: vec![hash],
            })
            .await?;
        Ok(response.is_new)
    }
}
