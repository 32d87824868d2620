//! CLI binary to create, grow and delete cache clusters.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use pasture_cloud_aws::AwsProvider;
use pasture_orchestrator::{ClusterSpec, Config, Orchestrator, RuntimeContext};
use pasture_probe::Prober;
use pasture_remote::{CloudCredentials, SshConnector, SshOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Orchestrator error
    #[error(transparent)]
    Orchestrator(#[from] pasture_orchestrator::Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Mode {
    /// Launch a new cluster
    Create,

    /// Add nodes to a running cluster
    Add,

    /// Tear the cluster down
    Delete,
}

#[derive(Clone, Debug, Parser)]
#[command(name = "pasture", version, about, long_about = None)]
struct Args {
    /// Operation to run
    #[arg(value_enum)]
    mode: Mode,

    /// Number of nodes to create or add
    node_count: Option<u32>,

    /// Bootstrap nodes so they can add nodes themselves
    #[arg(short, long, env = "PASTURE_SCALABLE")]
    scalable: bool,

    /// TOML config file
    #[arg(long, env = "PASTURE_CONFIG")]
    config: Option<PathBuf>,

    /// AWS region
    #[arg(long, env = "PASTURE_REGION")]
    region: Option<String>,

    /// Availability zone for nodes and the balancer
    #[arg(long, env = "PASTURE_ZONE")]
    zone: Option<String>,

    /// Machine image for nodes
    #[arg(long, env = "PASTURE_IMAGE_ID")]
    image_id: Option<String>,

    /// Instance type for nodes
    #[arg(long, env = "PASTURE_INSTANCE_TYPE")]
    instance_type: Option<String>,

    /// Port the cache server listens on
    #[arg(long, env = "PASTURE_CACHE_PORT")]
    cache_port: Option<u16>,

    /// Maximum cluster size
    #[arg(long, env = "PASTURE_MAX_NODES")]
    max_nodes: Option<u32>,

    /// SSH private key for reaching nodes
    #[arg(long, env = "PASTURE_SSH_KEY_PATH")]
    ssh_key_path: Option<PathBuf>,

    /// Cloud credential file
    #[arg(long, env = "PASTURE_CLOUD_CREDENTIALS_PATH")]
    cloud_credentials_path: Option<PathBuf>,
}

impl Args {
    /// Node count for `create` and `add`; exits with a usage error if absent.
    fn required_node_count(&self) -> u32 {
        self.node_count.unwrap_or_else(|| {
            Self::command()
                .error(
                    ErrorKind::MissingRequiredArgument,
                    "a node count is required for create and add",
                )
                .exit()
        })
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(region) = &self.region {
            config.region.clone_from(region);
        }
        if let Some(zone) = &self.zone {
            config.zone.clone_from(zone);
        }
        if let Some(image_id) = &self.image_id {
            config.image_id.clone_from(image_id);
        }
        if let Some(instance_type) = &self.instance_type {
            config.instance_type.clone_from(instance_type);
        }
        if let Some(cache_port) = self.cache_port {
            config.cache_port = cache_port;
        }
        if let Some(max_nodes) = self.max_nodes {
            config.max_nodes = max_nodes;
        }
        if let Some(path) = &self.ssh_key_path {
            config.ssh_key_path.clone_from(path);
        }
        if let Some(path) = &self.cloud_credentials_path {
            config.cloud_credentials_path.clone_from(path);
        }
    }

    fn load_config(&self) -> Result<Config, Error> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Config::from_file(path)?
            }
            None => Config::default(),
        };

        self.apply_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }
}

async fn provider(config: &Config) -> AwsProvider {
    match CloudCredentials::from_file(&config.cloud_credentials_path).await {
        Ok(credentials) => {
            AwsProvider::with_static_keys(
                config.region.clone(),
                credentials.access_key_id(),
                credentials.secret_access_key(),
            )
            .await
        }
        Err(e) => {
            warn!(
                "Cannot use {} ({}); falling back to the default credential chain",
                config.cloud_credentials_path.display(),
                e
            );
            AwsProvider::new(config.region.clone()).await
        }
    }
}

async fn run(
    mode: Mode,
    spec: ClusterSpec,
    config: Config,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let provider = provider(&config).await;
    let connector = SshConnector::new(SshOptions::new(
        config.ssh_user.clone(),
        config.ssh_key_path.clone(),
    ));
    let prober = Prober::http(config.timeouts.probe());

    let orchestrator = Orchestrator::new(RuntimeContext::new(
        config, provider, connector, prober, cancel,
    ));

    match mode {
        Mode::Create => {
            let report = orchestrator.create(&spec).await?;
            if let Some(dns) = report.balancer_dns {
                println!("{dns}");
            }
        }
        Mode::Add => {
            let report = orchestrator.add(spec.node_count).await?;
            info!("Cluster now has {} nodes", report.nodes.len());
        }
        Mode::Delete => orchestrator.delete().await?,
    }

    Ok(())
}

fn spawn_signal_handler(shutdown_token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                _ => {
                    warn!("Failed to install signal handlers; using ctrl-c only");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received interrupt signal");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }

        info!("Cancelling");
        shutdown_token.cancel();
    });
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            let _ = write!(message, ": {text}");
        }
        source = cause.source();
    }
    message
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let node_count = match args.mode {
        Mode::Create | Mode::Add => args.required_node_count(),
        Mode::Delete => 0,
    };

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let spec = ClusterSpec::new(&config, node_count, args.scalable);
    match run(args.mode, spec, config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_modes() {
        let args = Args::try_parse_from(["pasture", "create", "3", "-s"]).unwrap();
        assert_eq!(args.mode, Mode::Create);
        assert_eq!(args.node_count, Some(3));
        assert!(args.scalable);

        let args = Args::try_parse_from(["pasture", "delete"]).unwrap();
        assert_eq!(args.mode, Mode::Delete);
        assert_eq!(args.node_count, None);
    }

    #[test]
    fn test_unknown_mode_is_a_usage_error() {
        let err = Args::try_parse_from(["pasture", "resize", "3"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let args = Args::try_parse_from([
            "pasture",
            "add",
            "2",
            "--zone",
            "us-east-1c",
            "--cache-port",
            "8080",
            "--max-nodes",
            "9",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.zone, "us-east-1c");
        assert_eq!(config.cache_port, 8080);
        assert_eq!(config.max_nodes, 9);
        assert_eq!(config.region, "us-east-1");
    }

    #[test]
    fn test_error_chain_includes_causes() {
        let err = Error::from(pasture_orchestrator::Error::QuotaExceeded {
            requested: 6,
            max: 5,
        });

        assert_eq!(
            error_chain(&err),
            "attempted to grow cluster to 6 nodes, max is 5"
        );
    }
}
