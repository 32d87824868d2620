//! Sessions over the OpenSSH client.
//!
//! Each session owns a private control socket directory; the first
//! connection becomes the multiplexing master and every later command,
//! upload and interactive run rides on it.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::expect::ExpectScript;
use crate::{CommandOutput, Connector, FileSource, Session, shell_quote};

/// How to reach nodes over SSH.
#[derive(Clone, Debug)]
pub struct SshOptions {
    /// Login user.
    pub user: String,

    /// Private key passed with `-i`.
    pub key_path: PathBuf,

    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    /// Client binary.
    pub program: PathBuf,
}

impl SshOptions {
    /// Options for `user` authenticating with `key_path`.
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            connect_timeout: Duration::from_secs(10),
            program: PathBuf::from("ssh"),
        }
    }
}

/// Opens [`SshSession`]s.
#[derive(Clone, Debug)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    /// Creates a connector.
    #[must_use]
    pub const fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, host: &str) -> Result<SshSession> {
        let control_dir = tempfile::Builder::new()
            .prefix("pasture-ssh-")
            .tempdir()
            .map_err(|e| Error::Io("failed to create control directory", e))?;

        let session = SshSession {
            host: host.to_string(),
            options: self.options.clone(),
            control_dir,
        };

        // Opens the master connection; it stays up in the background.
        session.run("true").await?;

        Ok(session)
    }
}

/// A multiplexed SSH session to one node.
#[derive(Debug)]
pub struct SshSession {
    host: String,
    options: SshOptions,
    control_dir: TempDir,
}

impl SshSession {
    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("master")
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-i".to_string(),
            self.options.key_path.display().to_string(),
            "-l".to_string(),
            self.options.user.clone(),
        ]
    }

    fn command(&self, extra: &[&str], remote: &str) -> Command {
        let mut cmd = Command::new(&self.options.program);
        cmd.args(self.base_args())
            .args(extra)
            .arg(&self.host)
            .arg("--")
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn output(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> CommandOutput {
        CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    fn check(&self, command: &str, output: CommandOutput) -> Result<CommandOutput> {
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                host: self.host.clone(),
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Session for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = self.run_tolerant(command).await?;
        self.check(command, output)
    }

    async fn run_tolerant(&self, command: &str) -> Result<CommandOutput> {
        debug!("{}: running `{}`", self.host, command);

        let output = self
            .command(&[], command)
            .output()
            .await
            .map_err(|e| Error::Io("failed to run ssh", e))?;

        Ok(Self::output(output.status, &output.stdout, &output.stderr))
    }

    async fn run_detached(&self, command: &str) -> Result<()> {
        info!("{}: starting `{}`", self.host, command);

        self.run(&format!("tmux new-session -d {}", shell_quote(command)))
            .await?;

        Ok(())
    }

    async fn put_file(&self, source: &FileSource, remote_path: &str) -> Result<()> {
        let bytes = source.read().await?;
        let remote = format!("cat > {}", shell_quote(remote_path));
        debug!("{}: uploading {} bytes to {}", self.host, bytes.len(), remote_path);

        let mut child = self
            .command(&[], &remote)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Io("failed to spawn ssh", e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| missing_pipe("failed to capture ssh stdin"))?;
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| Error::Io("failed to stream upload", e))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Io("failed to wait for ssh", e))?;

        self.check(
            &remote,
            Self::output(output.status, &output.stdout, &output.stderr),
        )?;

        Ok(())
    }

    async fn run_interactive(&self, command: &str, script: &ExpectScript) -> Result<String> {
        info!("{}: running `{}` interactively", self.host, command);

        let mut child = self
            .command(&["-tt"], command)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Io("failed to spawn ssh", e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| missing_pipe("failed to capture ssh stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| missing_pipe("failed to capture ssh stdout"))?;

        let transcript = script.drive(&mut stdout, &mut stdin).await?;
        drop(stdin);

        let status = tokio::time::timeout(script.prompt_timeout(), child.wait())
            .await
            .map_err(|_| Error::ExpectTimeout {
                pattern: "<exit>".to_string(),
            })?
            .map_err(|e| Error::Io("failed to wait for ssh", e))?;

        self.check(command, Self::output(status, transcript.as_bytes(), b""))
            .map(|output| output.stdout)
    }

    async fn close(&self) -> Result<()> {
        let status = Command::new(&self.options.program)
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .arg("-O")
            .arg("exit")
            .arg(&self.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Io("failed to stop ssh master", e))?;

        if !status.success() {
            warn!("{}: ssh master did not exit cleanly", self.host);
        }

        Ok(())
    }
}

fn missing_pipe(what: &'static str) -> Error {
    Error::Io(what, std::io::ErrorKind::BrokenPipe.into())
}
