//! Remote shell access to cluster nodes and the node bootstrap plan.
//!
//! A [`Connector`] opens a [`Session`] to a node; the session runs commands,
//! uploads files, launches long-lived processes and drives interactive
//! programs through an [`ExpectScript`]. [`BootstrapPlan`] is the ordered
//! list of steps that turns a fresh instance into a running cache node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bootstrap;
mod credentials;
mod error;
mod expect;
mod ssh;

pub use bootstrap::{
    BootstrapConfig, BootstrapPlan, BootstrapStep, NodeParams, ScaleOutAssets, bootstrap,
};
pub use credentials::CloudCredentials;
pub use error::{BootstrapError, Error, Result};
pub use expect::{DEFAULT_PROMPT_TIMEOUT, ExpectScript, REDACTED};
pub use ssh::{SshConnector, SshOptions, SshSession};

use std::path::PathBuf;

use async_trait::async_trait;
use pasture_retry::{RetryPolicy, retry};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Captured result of a remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit status, or -1 if the command was killed by a signal.
    pub status: i32,

    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Content to upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileSource {
    /// In-memory content.
    Contents(Vec<u8>),

    /// A file on the local machine.
    Local(PathBuf),
}

impl FileSource {
    /// Reads the bytes to upload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a local file cannot be read.
    pub async fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::Contents(bytes) => Ok(bytes.clone()),
            Self::Local(path) => tokio::fs::read(path)
                .await
                .map_err(|e| Error::Io("failed to read upload source", e)),
        }
    }
}

impl From<String> for FileSource {
    fn from(text: String) -> Self {
        Self::Contents(text.into_bytes())
    }
}

/// An open shell session on one node.
#[async_trait]
pub trait Session
where
    Self: Send + Sync + 'static,
{
    /// Host this session is connected to.
    fn host(&self) -> &str;

    /// Runs a command and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] on a non-zero exit status.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Runs a command and returns its output whatever the exit status.
    async fn run_tolerant(&self, command: &str) -> Result<CommandOutput>;

    /// Starts a long-lived process that outlives this session.
    async fn run_detached(&self, command: &str) -> Result<()>;

    /// Writes `source` to `remote_path` on the node.
    async fn put_file(&self, source: &FileSource, remote_path: &str) -> Result<()>;

    /// Runs an interactive command on a pseudo-terminal, answering its
    /// prompts with `script`. Returns the program's output.
    async fn run_interactive(&self, command: &str, script: &ExpectScript) -> Result<String>;

    /// Closes the session.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions to nodes.
#[async_trait]
pub trait Connector
where
    Self: Send + Sync + 'static,
{
    /// Session type produced by this connector.
    type Session: Session;

    /// Makes a single connection attempt.
    async fn connect(&self, host: &str) -> Result<Self::Session>;
}

/// Connects to `host`, retrying any failure under `policy`.
///
/// A node that is still booting refuses connections exactly like one that
/// will never come up, so every error is retried.
///
/// # Errors
///
/// Returns [`Error::Connect`] once the policy is exhausted and
/// [`Error::Cancelled`] if `cancel` fires.
pub async fn connect_with_retry<C>(
    connector: &C,
    host: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<C::Session>
where
    C: Connector,
{
    info!("Connecting to {}", host);

    match retry(policy, cancel, &format!("connect to {host}"), move |_| {
        connector.connect(host)
    })
    .await
    {
        Ok(session) => {
            info!("Connected to {}", host);
            Ok(session)
        }
        Err(pasture_retry::Error::Cancelled) => Err(Error::Cancelled),
        Err(pasture_retry::Error::Exhausted { attempts, .. }) => Err(Error::Connect {
            host: host.to_string(),
            attempts,
        }),
    }
}

/// Quotes `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NullSession(String);

    #[async_trait]
    impl Session for NullSession {
        fn host(&self) -> &str {
            &self.0
        }

        async fn run(&self, _command: &str) -> Result<CommandOutput> {
            Ok(CommandOutput::default())
        }

        async fn run_tolerant(&self, _command: &str) -> Result<CommandOutput> {
            Ok(CommandOutput::default())
        }

        async fn run_detached(&self, _command: &str) -> Result<()> {
            Ok(())
        }

        async fn put_file(&self, _source: &FileSource, _remote_path: &str) -> Result<()> {
            Ok(())
        }

        async fn run_interactive(&self, _command: &str, _script: &ExpectScript) -> Result<String> {
            Ok(String::new())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Refuses a fixed number of connections.
    struct BootingConnector {
        refusals: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for BootingConnector {
        type Session = NullSession;

        async fn connect(&self, host: &str) -> Result<NullSession> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.refusals {
                Err(Error::Io(
                    "connect",
                    std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                ))
            } else {
                Ok(NullSession(host.to_string()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_node_accepts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let connector = BootingConnector {
            refusals: 3,
            attempts: attempts.clone(),
        };

        let session = connect_with_retry(
            &connector,
            "h0",
            &RetryPolicy::fixed(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(session.host(), "h0");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up() {
        let connector = BootingConnector {
            refusals: u32::MAX,
            attempts: Arc::new(AtomicU32::new(0)),
        };
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4), 5);

        let err = connect_with_retry(&connector, "h1", &policy, &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Connect { host, attempts: 5 } if host == "h1"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(
            shell_quote("run --args 'aws 0 7070'"),
            r"'run --args '\''aws 0 7070'\'''"
        );
    }
}
