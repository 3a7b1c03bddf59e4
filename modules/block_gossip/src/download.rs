use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use dashmap::DashMap;
use pergamon_common::{BlockHash, BlockSummary, Node};
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::configuration::{GossipConfig, RetryConfig};
use crate::errors::GossipError;
use crate::handles::{DownloadHandle, Watcher};
use crate::metrics::Metrics;
use crate::relay::RelayEngine;
use crate::services::{Backend, GossipConnector};
use crate::worker::Worker;

/// One scheduled block, keyed by hash in the item map.
///
/// The scheduler loop is the only writer. Workers read `sources` and `relay`
/// through the shared map; both only ever widen while a worker is active.
#[derive(Debug)]
pub(crate) struct DownloadItem {
    pub(crate) summary: BlockSummary,
    pub(crate) sources: Vec<Node>,
    pub(crate) relay: bool,
    pub(crate) dependencies: BTreeSet<BlockHash>,
    pub(crate) is_downloading: bool,
    pub(crate) is_error: bool,
    pub(crate) watchers: Vec<Watcher>,
}

impl DownloadItem {
    fn can_start(&self) -> bool {
        !self.is_downloading && self.dependencies.is_empty()
    }
}

/// Signals consumed by the scheduler loop.
pub(crate) enum Signal {
    Download {
        summary: BlockSummary,
        source: Node,
        relay: bool,
        schedule_feedback: oneshot::Sender<Result<(), GossipError>>,
        download_feedback: Watcher,
    },
    Success {
        hash: BlockHash,
    },
    Failure {
        hash: BlockHash,
        error: GossipError,
    },
}

/// Schedules block downloads in dependency order.
///
/// Scheduling is committed by the time `schedule_download` returns; the
/// download itself completes through the returned [`DownloadHandle`]. All
/// state lives in memory and is forgotten on shutdown.
pub struct DownloadManager {
    signals: mpsc::Sender<Signal>,
    items: Arc<DashMap<BlockHash, DownloadItem>>,
    workers: Arc<Mutex<HashMap<BlockHash, JoinHandle<()>>>>,
    scheduler: JoinHandle<()>,
    is_shutdown: AtomicBool,
}

impl DownloadManager {
    pub fn new(
        config: &GossipConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn GossipConnector>,
        relay: RelayEngine,
        metrics: Arc<Metrics>,
    ) -> Self {
        // One-slot queue: the loop applies one signal at a time and senders
        // wait their turn.
        let (signals, signal_source) = mpsc::channel(1);
        let items = Arc::new(DashMap::new());
        let workers = Arc::new(Mutex::new(HashMap::new()));
        let scheduler = Scheduler {
            items: items.clone(),
            workers: workers.clone(),
            signals: signals.clone(),
            backend,
            connector,
            relay,
            retries: config.retries.clone(),
            fetch_permits: Arc::new(Semaphore::new(config.max_parallel_downloads)),
            metrics,
        };
        let scheduler = tokio::spawn(scheduler.run(signal_source));
        Self {
            signals,
            items,
            workers,
            scheduler,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Schedule `summary` for download from `source`, relaying it onwards
    /// after storage when `relay` is set.
    ///
    /// Returns once the scheduling step is committed: dependency violations
    /// and shutdown come back as errors here, while the download outcome is
    /// reported through the returned handle. Re-scheduling merges: the source
    /// is added, the relay flag is sticky-OR'd and a fresh watcher is
    /// attached.
    pub async fn schedule_download(
        &self,
        summary: BlockSummary,
        source: Node,
        relay: bool,
    ) -> Result<DownloadHandle, GossipError> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(GossipError::AlreadyShutDown);
        }
        let (schedule_feedback, scheduled) = oneshot::channel();
        let (download_feedback, downloaded) = oneshot::channel();
        self.signals
            .send(Signal::Download {
                summary,
                source,
                relay,
                schedule_feedback,
                download_feedback,
            })
            .await
            .map_err(|_| GossipError::AlreadyShutDown)?;
        match scheduled.await {
            Ok(Ok(())) => Ok(DownloadHandle::new(downloaded)),
            Ok(Err(error)) => Err(error),
            // The loop was cancelled between enqueue and apply.
            Err(_) => Err(GossipError::AlreadyShutDown),
        }
    }

    /// Stop the scheduler loop and cancel all workers. Outstanding watchers
    /// resolve as [`GossipError::Cancelled`]; later `schedule_download` calls
    /// fail with [`GossipError::AlreadyShutDown`].
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.abort();
        let mut workers = self.workers.lock().await;
        let cancelled = workers.len();
        for (_, worker) in workers.drain() {
            worker.abort();
        }
        // Dropping the items drops their watcher senders, which resolves
        // outstanding handles as cancelled.
        self.items.clear();
        info!(cancelled_workers = cancelled, "download manager shut down");
    }
}

struct Scheduler {
    items: Arc<DashMap<BlockHash, DownloadItem>>,
    workers: Arc<Mutex<HashMap<BlockHash, JoinHandle<()>>>>,
    signals: mpsc::Sender<Signal>,
    backend: Arc<dyn Backend>,
    connector: Arc<dyn GossipConnector>,
    relay: RelayEngine,
    retries: RetryConfig,
    fetch_permits: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    async fn run(mut self, mut signals: mpsc::Receiver<Signal>) {
        while let Some(signal) = signals.recv().await {
            // The loop survives anything a handler reports; watchers have
            // been completed by the time an error reaches this point.
            if let Err(error) = self.handle(signal).await {
                warn!("scheduler error: {error:#}");
            }
        }
    }

    async fn handle(&mut self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Download {
                summary,
                source,
                relay,
                schedule_feedback,
                download_feedback,
            } => {
                let outcome = self.schedule(summary, source, relay, download_feedback).await;
                let _ = schedule_feedback.send(outcome);
                Ok(())
            }
            Signal::Success { hash } => self.finish_success(hash).await,
            Signal::Failure { hash, error } => self.finish_failure(hash, error).await,
        }
    }

    async fn schedule(
        &mut self,
        summary: BlockSummary,
        source: Node,
        relay: bool,
        watcher: Watcher,
    ) -> Result<(), GossipError> {
        let hash = summary.block_hash;

        // Merge into an existing item (its dependencies were validated when
        // it was first scheduled). Re-scheduling a tombstone clears the error
        // and lets the worker restart.
        let items = self.items.clone();
        if let Some(mut item) = items.get_mut(&hash) {
            if !item.sources.contains(&source) {
                item.sources.push(source);
            }
            item.relay |= relay;
            item.watchers.push(watcher);
            let was_error = std::mem::take(&mut item.is_error);
            let start = item.can_start();
            drop(item);
            if was_error {
                debug!(%hash, "re-scheduled a previously failed block");
            }
            if start {
                self.start_worker(hash).await;
            }
            return Ok(());
        }

        if self.backend.has_block(&hash).await? {
            debug!(%hash, "block already stored, completing watcher immediately");
            let _ = watcher.send(Ok(()));
            return Ok(());
        }

        // Every dependency must be scheduled or already stored; callers
        // schedule in topological order.
        let mut dependencies = BTreeSet::new();
        let mut missing = Vec::new();
        for dependency in summary.dependencies() {
            if self.items.contains_key(&dependency) {
                dependencies.insert(dependency);
            } else if !self.backend.has_block(&dependency).await? {
                missing.push(dependency);
            }
        }
        if !missing.is_empty() {
            return Err(GossipError::MissingDependencies { hash, missing });
        }

        let can_start = dependencies.is_empty();
        self.items.insert(
            hash,
            DownloadItem {
                summary,
                sources: vec![source],
                relay,
                dependencies,
                is_downloading: false,
                is_error: false,
                watchers: vec![watcher],
            },
        );
        self.metrics.inc_downloads_scheduled();
        debug!(%hash, blocked = !can_start, "scheduled block for download");
        if can_start {
            self.start_worker(hash).await;
        }
        Ok(())
    }

    async fn finish_success(&mut self, hash: BlockHash) -> Result<()> {
        self.workers.lock().await.remove(&hash);
        self.metrics.dec_downloads_ongoing();
        let Some((_, item)) = self.items.remove(&hash) else {
            bail!("success reported for unknown block {hash}");
        };
        self.metrics.dec_downloads_scheduled();
        self.metrics.record_download_succeeded();
        debug!(%hash, watchers = item.watchers.len(), "block downloaded");
        for watcher in item.watchers {
            let _ = watcher.send(Ok(()));
        }

        // Unblock dependants; those whose last dependency this was can now
        // start their workers.
        let mut ready = Vec::new();
        for mut entry in self.items.iter_mut() {
            if entry.dependencies.remove(&hash) && !entry.is_error && entry.can_start() {
                ready.push(*entry.key());
            }
        }
        for dependant in ready {
            self.start_worker(dependant).await;
        }
        Ok(())
    }

    /// Convert the item to a tombstone: the error is remembered, dependency
    /// edges of dependants stay in place, and watchers are completed with the
    /// terminal error.
    async fn finish_failure(&mut self, hash: BlockHash, error: GossipError) -> Result<()> {
        self.workers.lock().await.remove(&hash);
        self.metrics.dec_downloads_ongoing();
        self.metrics.record_download_failed();
        let Some(mut item) = self.items.get_mut(&hash) else {
            bail!("failure reported for unknown block {hash}");
        };
        item.is_downloading = false;
        item.is_error = true;
        let watchers = std::mem::take(&mut item.watchers);
        drop(item);
        warn!(%hash, watchers = watchers.len(), "block download failed: {error}");
        for watcher in watchers {
            let _ = watcher.send(Err(error.clone()));
        }
        Ok(())
    }

    async fn start_worker(&mut self, hash: BlockHash) {
        let summary = {
            let Some(mut item) = self.items.get_mut(&hash) else {
                return;
            };
            if item.is_downloading {
                return;
            }
            item.is_downloading = true;
            item.summary.clone()
        };
        self.metrics.inc_downloads_ongoing();
        let worker = Worker {
            hash,
            summary,
            items: self.items.clone(),
            signals: self.signals.clone(),
            backend: self.backend.clone(),
            connector: self.connector.clone(),
            relay: self.relay.clone(),
            retries: self.retries.clone(),
            fetch_permits: self.fetch_permits.clone(),
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(worker.run());
        self.workers.lock().await.insert(hash, handle);
    }
}
