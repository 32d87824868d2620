//! Error types for cluster orchestration.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating, scaling or deleting a cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// A node failed to bootstrap.
    #[error("bootstrap of node {ordinal} ({host}) failed at '{step}': {source}")]
    Bootstrap {
        /// Public address of the node.
        host: String,

        /// Ordinal index of the node.
        ordinal: u32,

        /// Step that failed.
        step: &'static str,

        /// Underlying failure.
        #[source]
        source: pasture_remote::Error,
    },

    /// The operation was interrupted.
    #[error("cancelled")]
    Cancelled,

    /// Provider failure.
    #[error(transparent)]
    Cloud(#[from] pasture_cloud::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A node or the balancer never became reachable.
    #[error(transparent)]
    Probe(#[from] pasture_probe::Error),

    /// The request would grow the cluster past its node limit.
    #[error("attempted to grow cluster to {requested} nodes, max is {max}")]
    QuotaExceeded {
        /// Cluster size the request would lead to.
        requested: u32,

        /// Configured node limit.
        max: u32,
    },

    /// Live members do not hold ordinals `0..n`, so a new node's ordinal
    /// would not match its roster position.
    #[error("live node ordinals {found:?} are not contiguous from 0; delete and recreate the cluster")]
    SparseOrdinals {
        /// Ordinals of the running members, in order.
        found: Vec<u32>,
    },

    /// Preparing uploads for scalable nodes failed.
    #[error("failed to prepare scale-out assets: {0}")]
    ScaleOut(#[source] pasture_remote::Error),
}

impl Error {
    /// Returns true if the error came from cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Probe(pasture_probe::Error::Cancelled(_))
                | Self::Bootstrap {
                    source: pasture_remote::Error::Cancelled,
                    ..
                }
        )
    }
}
