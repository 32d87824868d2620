//! Error types for remote sessions and bootstrapping.

use std::io;

use thiserror::Error;

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a node.
#[derive(Debug, Error)]
pub enum Error {
    /// The node never accepted a connection.
    #[error("could not connect to {host} after {attempts} attempts")]
    Connect {
        /// Host that was dialled.
        host: String,

        /// Number of attempts made.
        attempts: u32,
    },

    /// The shared cancellation token fired.
    #[error("cancelled")]
    Cancelled,

    /// A remote command exited with a non-zero status.
    #[error("`{command}` on {host} exited with status {status}: {stderr}")]
    CommandFailed {
        /// Host the command ran on.
        host: String,

        /// The command line.
        command: String,

        /// Exit status, or -1 if killed by a signal.
        status: i32,

        /// Captured standard error.
        stderr: String,
    },

    /// Reading the credential file failed.
    #[error("invalid credentials: {0}")]
    Credentials(String),

    /// An expected prompt never appeared and nothing else was printed.
    #[error("timed out waiting for prompt matching `{pattern}`")]
    ExpectTimeout {
        /// Pattern that was awaited.
        pattern: String,
    },

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// A prompt pattern failed to compile.
    #[error("invalid prompt pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The program exited before printing the expected prompt.
    #[error("program exited while waiting for `{pattern}`; output: {output}")]
    PromptClosed {
        /// Pattern that was awaited.
        pattern: String,

        /// Output received since the last matched prompt.
        output: String,
    },

    /// The program stalled on output no pattern matched.
    #[error("unexpected prompt: {output}")]
    UnexpectedPrompt {
        /// Output received since the last matched prompt.
        output: String,
    },
}

/// A bootstrap step failed.
#[derive(Debug, Error)]
#[error("step '{step}' failed: {source}")]
pub struct BootstrapError {
    /// Name of the failing step.
    pub step: &'static str,

    /// Underlying failure.
    #[source]
    pub source: Error,
}

impl BootstrapError {
    /// Wraps `source` as a failure of `step`.
    pub const fn new(step: &'static str, source: Error) -> Self {
        Self { step, source }
    }
}
