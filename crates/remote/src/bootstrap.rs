//! The ordered steps that turn a fresh instance into a cache node.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pasture_retry::RetryPolicy;
use pasture_roster::Roster;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::credentials::CloudCredentials;
use crate::error::{BootstrapError, Error, Result};
use crate::expect::ExpectScript;
use crate::{Connector, FileSource, Session, connect_with_retry};

/// Commands, source location and remote paths used to bootstrap a node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Updates OS packages.
    pub update_command: String,

    /// Installs the JVM, tmux and git.
    pub install_command: String,

    /// Application repository cloned onto each node.
    pub repository: String,

    /// Branch checked out after cloning.
    pub branch: String,

    /// Directory the repository is cloned into.
    pub checkout_dir: String,

    /// Cache server project directory.
    pub cache_node_dir: String,

    /// Monitor project directory.
    pub monitor_dir: String,

    /// Roster path read by the cache server.
    pub cache_roster_path: String,

    /// Roster path read by the monitor.
    pub monitor_roster_path: String,

    /// First positional argument passed to the cache server.
    pub deployment_mode: String,

    /// Installs the monitor's runtime.
    pub monitor_runtime_command: String,

    /// Starts the monitor; run detached.
    pub monitor_launch_command: String,

    /// Installs the cloud CLI on scalable nodes, one command per entry.
    pub cloud_cli_install_commands: Vec<String>,

    /// Interactive command that stores cloud credentials on the node.
    pub cloud_configure_command: String,

    /// Output format answered to the configure prompt.
    pub cloud_output_format: String,

    /// Where the SSH private key is placed on scalable nodes.
    pub remote_ssh_key_path: String,

    /// Where the credential file is placed on scalable nodes.
    pub remote_credentials_path: String,

    /// Where the orchestrator binary is placed on scalable nodes.
    pub remote_binary_path: String,

    /// Where the orchestrator config is placed on scalable nodes.
    pub remote_config_path: String,

    /// Keep going when the package manager exits non-zero.
    pub tolerate_package_failures: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            update_command: "sudo yum update -y".to_string(),
            install_command: "sudo yum install git java-11-amazon-corretto-headless tmux -y"
                .to_string(),
            repository: "https://github.com/RiceComp413-Fall2022/CacheCow".to_string(),
            branch: "Autoscale-POC".to_string(),
            checkout_dir: "CacheCow".to_string(),
            cache_node_dir: "CacheCow/cache-node".to_string(),
            monitor_dir: "CacheCow/monitor-node".to_string(),
            cache_roster_path: "CacheCow/cache-node/nodes.txt".to_string(),
            monitor_roster_path: "CacheCow/monitor-node/src/nodes.txt".to_string(),
            deployment_mode: "aws".to_string(),
            monitor_runtime_command: "curl -o- https://raw.githubusercontent.com/nvm-sh/nvm/v0.34.0/install.sh | bash && . ~/.nvm/nvm.sh && nvm install 16".to_string(),
            monitor_launch_command: ". ~/.nvm/nvm.sh && npm install && npm start".to_string(),
            cloud_cli_install_commands: vec![
                "curl https://awscli.amazonaws.com/awscli-exe-linux-x86_64.zip -o awscliv2.zip"
                    .to_string(),
                "unzip -o awscliv2.zip".to_string(),
                "sudo ./aws/install --update".to_string(),
            ],
            cloud_configure_command: "aws configure".to_string(),
            cloud_output_format: String::new(),
            remote_ssh_key_path: "CacheCow/CacheCow.pem".to_string(),
            remote_credentials_path: "CacheCow/rootkey.csv".to_string(),
            remote_binary_path: "CacheCow/pasture".to_string(),
            remote_config_path: "CacheCow/pasture.toml".to_string(),
            tolerate_package_failures: false,
        }
    }
}

/// Per-node launch parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeParams {
    /// Ordinal index of the node.
    pub ordinal: u32,

    /// Port the cache server listens on.
    pub cache_port: u16,

    /// Whether the node joins an already running cluster.
    pub new_node: bool,
}

/// Everything a scalable node needs to grow the cluster itself.
#[derive(Clone, Debug)]
pub struct ScaleOutAssets {
    /// SSH private key for reaching new nodes.
    pub ssh_key: FileSource,

    /// Cloud credential file.
    pub credentials_file: FileSource,

    /// Answers for the cloud CLI's configure prompts.
    pub configure_script: ExpectScript,

    /// The orchestrator binary.
    pub orchestrator_binary: FileSource,

    /// Orchestrator config rendered for the node, if any.
    pub orchestrator_config: Option<FileSource>,
}

impl ScaleOutAssets {
    /// Reads the credential file and prepares the uploads.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential file is unreadable or malformed.
    pub async fn prepare(
        ssh_key_path: &Path,
        credentials_path: &Path,
        region: &str,
        config: &BootstrapConfig,
        prompt_timeout: Duration,
        orchestrator_binary: PathBuf,
        orchestrator_config: Option<String>,
    ) -> Result<Self> {
        let credentials = CloudCredentials::from_file(credentials_path).await?;
        let configure_script =
            credentials.configure_script(region, &config.cloud_output_format, prompt_timeout)?;

        Ok(Self {
            ssh_key: FileSource::Local(ssh_key_path.to_path_buf()),
            credentials_file: FileSource::Local(credentials_path.to_path_buf()),
            configure_script,
            orchestrator_binary: FileSource::Local(orchestrator_binary),
            orchestrator_config: orchestrator_config.map(FileSource::from),
        })
    }
}

/// A single bootstrap action.
#[derive(Clone, Debug)]
pub enum BootstrapStep {
    /// Run a command to completion.
    Run {
        /// Step name used in logs and errors.
        name: &'static str,

        /// Shell command.
        command: String,

        /// Ignore a non-zero exit status.
        tolerant: bool,
    },

    /// Start a long-lived process.
    Detached {
        /// Step name used in logs and errors.
        name: &'static str,

        /// Shell command.
        command: String,
    },

    /// Write a file on the node.
    Upload {
        /// Step name used in logs and errors.
        name: &'static str,

        /// Content to write.
        source: FileSource,

        /// Destination path.
        remote_path: String,
    },

    /// Drive an interactive program.
    Interactive {
        /// Step name used in logs and errors.
        name: &'static str,

        /// Shell command.
        command: String,

        /// Prompt answers.
        script: ExpectScript,
    },
}

impl BootstrapStep {
    /// Step name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Run { name, .. }
            | Self::Detached { name, .. }
            | Self::Upload { name, .. }
            | Self::Interactive { name, .. } => *name,
        }
    }

    fn run(name: &'static str, command: impl Into<String>) -> Self {
        Self::Run {
            name,
            command: command.into(),
            tolerant: false,
        }
    }

    fn upload(name: &'static str, source: FileSource, remote_path: &str) -> Self {
        Self::Upload {
            name,
            source,
            remote_path: remote_path.to_string(),
        }
    }

    async fn apply<S>(&self, session: &S) -> Result<()>
    where
        S: Session + ?Sized,
    {
        match self {
            Self::Run {
                command,
                tolerant: false,
                ..
            } => session.run(command).await.map(|_| ()),
            Self::Run {
                command,
                tolerant: true,
                ..
            } => {
                let output = session.run_tolerant(command).await?;
                if !output.success() {
                    warn!(
                        "{}: `{}` exited with {}; continuing",
                        session.host(),
                        command,
                        output.status
                    );
                }
                Ok(())
            }
            Self::Detached { command, .. } => session.run_detached(command).await,
            Self::Upload {
                source,
                remote_path,
                ..
            } => session.put_file(source, remote_path).await,
            Self::Interactive {
                command, script, ..
            } => session.run_interactive(command, script).await.map(|_| ()),
        }
    }
}

/// Ordered bootstrap steps for one node.
#[derive(Clone, Debug, Default)]
pub struct BootstrapPlan {
    steps: Vec<BootstrapStep>,
}

impl BootstrapPlan {
    /// Builds the plan for `node`.
    ///
    /// With `scale_out` the node receives credentials and the orchestrator
    /// so it can add nodes itself, and the cache server is started with the
    /// scalable flag.
    #[must_use]
    pub fn build(
        config: &BootstrapConfig,
        node: &NodeParams,
        roster: &Roster,
        scale_out: Option<&ScaleOutAssets>,
    ) -> Self {
        let roster = FileSource::from(roster.render());
        let tolerant = config.tolerate_package_failures;

        let mut steps = vec![
            BootstrapStep::Run {
                name: "update packages",
                command: config.update_command.clone(),
                tolerant,
            },
            BootstrapStep::Run {
                name: "install dependencies",
                command: config.install_command.clone(),
                tolerant,
            },
            BootstrapStep::run(
                "clone source",
                format!("git clone {} {}", config.repository, config.checkout_dir),
            ),
            BootstrapStep::run(
                "switch branch",
                format!("cd {}/ && git switch {}", config.cache_node_dir, config.branch),
            ),
        ];

        if let Some(assets) = scale_out {
            steps.push(BootstrapStep::upload(
                "upload ssh key",
                assets.ssh_key.clone(),
                &config.remote_ssh_key_path,
            ));
            steps.push(BootstrapStep::upload(
                "upload credentials",
                assets.credentials_file.clone(),
                &config.remote_credentials_path,
            ));
            for command in &config.cloud_cli_install_commands {
                steps.push(BootstrapStep::run("install cloud cli", command.clone()));
            }
            steps.push(BootstrapStep::Interactive {
                name: "configure cloud cli",
                command: config.cloud_configure_command.clone(),
                script: assets.configure_script.clone(),
            });
            steps.push(BootstrapStep::upload(
                "upload orchestrator",
                assets.orchestrator_binary.clone(),
                &config.remote_binary_path,
            ));
            steps.push(BootstrapStep::run(
                "mark orchestrator executable",
                format!("chmod +x {}", config.remote_binary_path),
            ));
            if let Some(orchestrator_config) = &assets.orchestrator_config {
                steps.push(BootstrapStep::upload(
                    "upload orchestrator config",
                    orchestrator_config.clone(),
                    &config.remote_config_path,
                ));
            }
        }

        let mut args = format!(
            "{} {} {}",
            config.deployment_mode, node.ordinal, node.cache_port
        );
        if scale_out.is_some() {
            args.push_str(" -s");
        }
        if node.new_node {
            args.push_str(" -n");
        }

        steps.extend([
            BootstrapStep::upload("upload cache roster", roster.clone(), &config.cache_roster_path),
            BootstrapStep::Detached {
                name: "launch cache node",
                command: format!("cd {}/ && ./gradlew run --args '{args}'", config.cache_node_dir),
            },
            BootstrapStep::run("install monitor runtime", config.monitor_runtime_command.clone()),
            BootstrapStep::upload("upload monitor roster", roster, &config.monitor_roster_path),
            BootstrapStep::Detached {
                name: "launch monitor",
                command: format!(
                    "cd {}/ && {}",
                    config.monitor_dir, config.monitor_launch_command
                ),
            },
        ]);

        Self { steps }
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Runs every step on `session`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the failing step with its cause, or [`Error::Cancelled`]
    /// wrapped in the interrupted step.
    pub async fn execute<S>(
        &self,
        session: &S,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), BootstrapError>
    where
        S: Session + ?Sized,
    {
        for step in &self.steps {
            info!("{}: {}", session.host(), step.name());

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(BootstrapError::new(step.name(), Error::Cancelled));
                }
                result = step.apply(session) => {
                    result.map_err(|e| BootstrapError::new(step.name(), e))?;
                }
            }
        }

        Ok(())
    }
}

/// Connects to `host` and runs `plan` on it.
///
/// # Errors
///
/// Returns the failing step; a connection failure is reported as step
/// `connect`.
pub async fn bootstrap<C>(
    connector: &C,
    host: &str,
    plan: &BootstrapPlan,
    connect_policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> std::result::Result<(), BootstrapError>
where
    C: Connector,
{
    let session = connect_with_retry(connector, host, connect_policy, cancel)
        .await
        .map_err(|e| BootstrapError::new("connect", e))?;

    let outcome = plan.execute(&session, cancel).await;

    if let Err(e) = session.close().await {
        warn!("{}: failed to close session: {}", host, e);
    }

    if outcome.is_ok() {
        info!("{}: bootstrapped", host);
    }

    outcome
}
