//! Orchestrator configuration.
//!
//! Every field has a default matching the reference deployment, so a config
//! file only needs the values that differ.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pasture_remote::BootstrapConfig;
use pasture_retry::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Port the SSH daemon listens on; cluster ports must not collide with it.
const SSH_PORT: u16 = 22;

/// Top-level configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cloud region.
    pub region: String,

    /// Availability zone for every node and the balancer subnet.
    pub zone: String,

    /// Machine image booted on each node.
    pub image_id: String,

    /// Instance size.
    pub instance_type: String,

    /// Key pair installed on each node.
    pub key_name: String,

    /// Root volume size in GiB.
    pub volume_size_gib: i32,

    /// Port the cache server and the balancer listener use.
    pub cache_port: u16,

    /// Port the monitor UI serves.
    pub monitor_port: u16,

    /// Upper bound on cluster size.
    pub max_nodes: u32,

    /// Login user on the nodes.
    pub ssh_user: String,

    /// Private key for SSH.
    pub ssh_key_path: PathBuf,

    /// Root key file with the cloud access key pair.
    pub cloud_credentials_path: PathBuf,

    /// Resource names.
    pub names: NamesConfig,

    /// Retry policies.
    pub retry: RetryConfig,

    /// Provider wait and probe timeouts.
    pub timeouts: TimeoutsConfig,

    /// Node bootstrap commands and paths.
    pub bootstrap: BootstrapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            zone: "us-east-1b".to_string(),
            image_id: "ami-09d3b3274b6c5d4aa".to_string(),
            instance_type: "t3.medium".to_string(),
            key_name: "CacheCow".to_string(),
            volume_size_gib: 16,
            cache_port: 7070,
            monitor_port: 3000,
            max_nodes: 5,
            ssh_user: "ec2-user".to_string(),
            ssh_key_path: PathBuf::from("CacheCow.pem"),
            cloud_credentials_path: PathBuf::from("rootkey.csv"),
            names: NamesConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutsConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

/// Names of the cluster's provider resources.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamesConfig {
    /// Firewall policy (security group) name.
    pub security_group: String,

    /// Target group name.
    pub target_group: String,

    /// Load balancer name.
    pub balancer: String,

    /// Key of the tag marking cluster members.
    pub member_tag_key: String,

    /// Value of the tag marking cluster members.
    pub member_tag_value: String,
}

impl Default for NamesConfig {
    fn default() -> Self {
        Self {
            security_group: "cachecow-security".to_string(),
            target_group: "cachecow-nodes".to_string(),
            balancer: "cachecow-balancer".to_string(),
            member_tag_key: "Name".to_string(),
            member_tag_value: "CacheCow Node".to_string(),
        }
    }
}

/// A retry policy as written in the config file.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Delay after the first failed attempt.
    pub initial_delay_secs: u64,

    /// Ceiling for the doubled delay.
    pub max_delay_secs: u64,

    /// Attempts before giving up; 0 retries until cancelled.
    pub max_attempts: u32,
}

impl RetrySettings {
    /// The policy these settings describe.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            max_attempts: if self.max_attempts == 0 {
                None
            } else {
                Some(self.max_attempts)
            },
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.initial_delay_secs == 0 {
            return Err(Error::Config(format!(
                "retry.{name}.initial_delay_secs must be positive"
            )));
        }
        if self.initial_delay_secs > self.max_delay_secs {
            return Err(Error::Config(format!(
                "retry.{name}.initial_delay_secs must not exceed max_delay_secs"
            )));
        }
        Ok(())
    }
}

/// Retry policies for the two client-side waits.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Waiting for a node to accept SSH.
    pub connect: RetrySettings,

    /// Waiting for a node or the balancer to answer HTTP.
    pub probe: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect: RetrySettings {
                initial_delay_secs: 5,
                max_delay_secs: 30,
                max_attempts: 40,
            },
            probe: RetrySettings {
                initial_delay_secs: 5,
                max_delay_secs: 5,
                max_attempts: 360,
            },
        }
    }
}

/// Timeouts, in seconds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// A single liveness probe.
    pub probe_secs: u64,

    /// An instance reaching the running state.
    pub instance_running_secs: u64,

    /// The balancer becoming active.
    pub balancer_available_secs: u64,

    /// Instances terminating during teardown.
    pub instance_terminated_secs: u64,

    /// Each interactive prompt during bootstrap.
    pub prompt_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            probe_secs: 5,
            instance_running_secs: 600,
            balancer_available_secs: 900,
            instance_terminated_secs: 900,
            prompt_secs: 60,
        }
    }
}

impl TimeoutsConfig {
    /// Timeout for a single liveness probe.
    #[must_use]
    pub const fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    /// Maximum wait for an instance to run.
    #[must_use]
    pub const fn instance_running(&self) -> Duration {
        Duration::from_secs(self.instance_running_secs)
    }

    /// Maximum wait for the balancer to become active.
    #[must_use]
    pub const fn balancer_available(&self) -> Duration {
        Duration::from_secs(self.balancer_available_secs)
    }

    /// Maximum wait for instances to terminate.
    #[must_use]
    pub const fn instance_terminated(&self) -> Duration {
        Duration::from_secs(self.instance_terminated_secs)
    }

    /// Timeout for each interactive prompt.
    #[must_use]
    pub const fn prompt(&self) -> Duration {
        Duration::from_secs(self.prompt_secs)
    }
}

impl Config {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is malformed or invalid.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file is unreadable, malformed or
    /// invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        Self::from_toml(&text)
    }

    /// Renders the config as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))
    }

    /// Checks field ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 {
            return Err(Error::Config("max_nodes must be at least 1".to_string()));
        }

        for (name, port) in [("cache_port", self.cache_port), ("monitor_port", self.monitor_port)] {
            if port == 0 || port == SSH_PORT {
                return Err(Error::Config(format!(
                    "{name} must be non-zero and not {SSH_PORT}"
                )));
            }
        }

        if self.cache_port == self.monitor_port {
            return Err(Error::Config(
                "cache_port and monitor_port must differ".to_string(),
            ));
        }

        if self.volume_size_gib <= 0 {
            return Err(Error::Config("volume_size_gib must be positive".to_string()));
        }

        self.retry.connect.validate("connect")?;
        self.retry.probe.validate("probe")?;

        let timeouts = [
            ("probe_secs", self.timeouts.probe_secs),
            ("instance_running_secs", self.timeouts.instance_running_secs),
            ("balancer_available_secs", self.timeouts.balancer_available_secs),
            ("instance_terminated_secs", self.timeouts.instance_terminated_secs),
            ("prompt_secs", self.timeouts.prompt_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(Error::Config(format!("timeouts.{name} must be positive")));
        }

        Ok(())
    }

    /// The config a scalable node uses to grow the cluster itself.
    ///
    /// Local key and credential paths are replaced with where the bootstrap
    /// puts them on the node.
    #[must_use]
    pub fn for_node(&self) -> Self {
        let home = PathBuf::from(format!("/home/{}", self.ssh_user));

        Self {
            ssh_key_path: home.join(&self.bootstrap.remote_ssh_key_path),
            cloud_credentials_path: home.join(&self.bootstrap.remote_credentials_path),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.max_nodes, 5);
        assert_eq!(config.cache_port, 7070);
        assert_eq!(config.zone, "us-east-1b");
    }

    #[test]
    fn test_partial_file_overrides() {
        let config = Config::from_toml(
            r#"
            max_nodes = 8
            instance_type = "t3.large"

            [names]
            balancer = "staging-balancer"

            [retry.probe]
            initial_delay_secs = 2
            max_delay_secs = 10
            max_attempts = 0

            [bootstrap]
            branch = "main"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_nodes, 8);
        assert_eq!(config.instance_type, "t3.large");
        assert_eq!(config.names.balancer, "staging-balancer");
        assert_eq!(config.names.target_group, "cachecow-nodes");
        assert_eq!(config.retry.probe.policy().max_attempts, None);
        assert_eq!(config.bootstrap.branch, "main");
        assert_eq!(
            config.bootstrap.repository,
            BootstrapConfig::default().repository
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Config::from_toml("max_node = 3").unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_bootstrap_field_is_rejected() {
        let err = Config::from_toml("[bootstrap]\nbranh = \"main\"").unwrap_err();

        assert!(matches!(err, Error::Config(ref msg) if msg.contains("branh")));
    }

    #[test]
    fn test_validation() {
        let cases = [
            "max_nodes = 0",
            "cache_port = 22",
            "monitor_port = 7070",
            "[retry.connect]\ninitial_delay_secs = 40\nmax_delay_secs = 30\nmax_attempts = 3",
            "[timeouts]\nprobe_secs = 0",
        ];

        for case in cases {
            assert!(
                matches!(Config::from_toml(case), Err(Error::Config(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pasture.toml");
        std::fs::write(&path, "zone = \"us-east-1a\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.zone, "us-east-1a");
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_node_config_round_trips_with_remote_paths() {
        let config = Config::default().for_node();

        assert_eq!(
            config.ssh_key_path,
            PathBuf::from("/home/ec2-user/CacheCow/CacheCow.pem")
        );
        assert_eq!(
            config.cloud_credentials_path,
            PathBuf::from("/home/ec2-user/CacheCow/rootkey.csv")
        );
        assert_eq!(Config::from_toml(&config.to_toml().unwrap()).unwrap(), config);
    }
}
