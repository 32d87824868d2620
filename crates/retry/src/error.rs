use thiserror::Error;

/// Result type for retried operations.
pub type Result<T, E> = std::result::Result<T, Error<E>>;

/// Why a retried operation stopped without succeeding.
#[derive(Debug, Error)]
pub enum Error<E> {
    /// The cancellation token fired before the operation succeeded.
    #[error("cancelled")]
    Cancelled,

    /// Every attempt allowed by the policy failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,

        /// Error from the final attempt.
        last: E,
    },
}

impl<E> Error<E> {
    /// Returns true if the operation was cancelled.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
