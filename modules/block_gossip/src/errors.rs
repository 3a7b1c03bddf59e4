use pergamon_common::{BlockHash, Node};
use thiserror::Error;

use crate::services::BackendError;

/// Errors surfaced by the gossip core.
///
/// Cloneable so that one terminal error can complete every watcher attached
/// to a download item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GossipError {
    /// Scheduling was attempted after shutdown began
    #[error("download manager is shut down")]
    AlreadyShutDown,

    /// The block was scheduled before its dependencies; callers must schedule
    /// in topological order
    #[error("block {hash} is missing dependencies {missing:?}")]
    MissingDependencies {
        hash: BlockHash,
        missing: Vec<BlockHash>,
    },

    /// The peer violated the chunked transfer contract
    #[error("invalid chunk stream from {source_node}: {reason}")]
    InvalidChunks { source_node: String, reason: String },

    /// Connect or stream failure
    #[error("transport error with {peer}: {message}")]
    Transport { peer: String, message: String },

    /// Validation or storage failure, classified by the backend
    #[error("backend error: {message}")]
    Backend { message: String, fatal: bool },

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The subsystem shut down while the download was outstanding
    #[error("download was cancelled")]
    Cancelled,
}

impl GossipError {
    pub(crate) fn transport(peer: &Node, error: anyhow::Error) -> Self {
        GossipError::Transport {
            peer: peer.to_string(),
            message: format!("{error:#}"),
        }
    }

    /// Fatal errors abort retries and fail-over immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GossipError::Backend { fatal: true, .. } | GossipError::Configuration(_)
        )
    }
}

impl From<BackendError> for GossipError {
    fn from(error: BackendError) -> Self {
        GossipError::Backend {
            message: format!("{:#}", error.error),
            fatal: error.fatal,
        }
    }
}
