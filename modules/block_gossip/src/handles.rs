use tokio::sync::oneshot;

use crate::errors::GossipError;

/// Sender half of a download watcher; completed exactly once by the
/// scheduler loop.
pub(crate) type Watcher = oneshot::Sender<Result<(), GossipError>>;

/// Completion of a relay round.
///
/// Resolves when the round has terminated; it says nothing about delivery to
/// any particular peer.
#[derive(Debug)]
pub struct WaitHandle(oneshot::Receiver<()>);

impl WaitHandle {
    pub(crate) fn new(rx: oneshot::Receiver<()>) -> Self {
        Self(rx)
    }

    /// A handle whose round has already completed.
    pub(crate) fn ready() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Self(rx)
    }

    /// Wait for the round to end. Relay errors are tallied and logged, never
    /// surfaced here.
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

/// Completion of a scheduled download.
///
/// Distinct from [`WaitHandle`] so a caller cannot await the wrong side of
/// `schedule_download`: scheduling errors come back synchronously from the
/// call, download errors through this handle.
#[derive(Debug)]
pub struct DownloadHandle(oneshot::Receiver<Result<(), GossipError>>);

impl DownloadHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), GossipError>>) -> Self {
        Self(rx)
    }

    /// Wait until the block is downloaded and stored, or the download fails.
    ///
    /// A shutdown that drops the item resolves as [`GossipError::Cancelled`]
    /// rather than leaving the caller hanging.
    pub async fn wait(self) -> Result<(), GossipError> {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(_) => Err(GossipError::Cancelled),
        }
    }
}
