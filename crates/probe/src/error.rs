use thiserror::Error;

/// Result type for probe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from waiting on a target to become reachable.
///
/// A single probe never fails; only the wait loop does.
#[derive(Debug, Error)]
pub enum Error {
    /// The wait was cancelled.
    #[error("wait for {0} cancelled")]
    Cancelled(String),

    /// The target never answered within the retry policy.
    #[error("{target} still unreachable after {attempts} attempts")]
    Unreachable {
        /// The `host:port` being probed.
        target: String,

        /// Number of probes made.
        attempts: u32,
    },
}
