use std::sync::atomic::{AtomicU64, Ordering};

/// Gossip metrics collector.
///
/// Counters and gauges all start at zero; writers are the scheduler, the
/// workers and the relay engine, so every cell is atomic.
#[derive(Debug, Default)]
pub struct Metrics {
    relay_accepted: AtomicU64,
    relay_rejected: AtomicU64,
    relay_failed: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    downloads_scheduled: AtomicU64,
    downloads_ongoing: AtomicU64,
    fetches_ongoing: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A peer accepted an announced block as new
    pub fn record_relay_accepted(&self) {
        self.relay_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A peer reported an announced block as already known
    pub fn record_relay_rejected(&self) {
        self.relay_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// An announcement failed with a transport or remote error
    pub fn record_relay_failed(&self) {
        self.relay_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_succeeded(&self) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetch attempt failed and was retried, or a download failed terminally
    pub fn record_download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downloads_scheduled(&self) {
        self.downloads_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_downloads_scheduled(&self) {
        self.downloads_scheduled.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_downloads_ongoing(&self) {
        self.downloads_ongoing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_downloads_ongoing(&self) {
        self.downloads_ongoing.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_fetches_ongoing(&self) {
        self.fetches_ongoing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_fetches_ongoing(&self) {
        self.fetches_ongoing.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn relay_accepted(&self) -> u64 {
        self.relay_accepted.load(Ordering::Relaxed)
    }

    pub fn relay_rejected(&self) -> u64 {
        self.relay_rejected.load(Ordering::Relaxed)
    }

    pub fn relay_failed(&self) -> u64 {
        self.relay_failed.load(Ordering::Relaxed)
    }

    pub fn downloads_succeeded(&self) -> u64 {
        self.downloads_succeeded.load(Ordering::Relaxed)
    }

    pub fn downloads_failed(&self) -> u64 {
        self.downloads_failed.load(Ordering::Relaxed)
    }

    pub fn downloads_scheduled(&self) -> u64 {
        self.downloads_scheduled.load(Ordering::Relaxed)
    }

    pub fn downloads_ongoing(&self) -> u64 {
        self.downloads_ongoing.load(Ordering::Relaxed)
    }

    pub fn fetches_ongoing(&self) -> u64 {
        self.fetches_ongoing.load(Ordering::Relaxed)
    }
}
