//! Shared fakes for orchestrator scenario tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pasture_cloud_mock::MockCloud;
use pasture_orchestrator::{Config, Orchestrator, RuntimeContext};
use pasture_probe::{Prober, Transport};
use pasture_remote::{
    CommandOutput, Connector, Error, ExpectScript, FileSource, Result, ScaleOutAssets, Session,
};
use tokio_util::sync::CancellationToken;

/// Something a node was asked to do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Run(String),
    Detached(String),
    Upload { path: String, contents: String },
    Interactive(String),
    Close,
}

#[derive(Debug, Default)]
struct Recorded {
    events: BTreeMap<String, Vec<Event>>,
    connects: BTreeMap<String, u32>,
    refused: HashSet<String>,
    failing: Vec<(String, String)>,
}

/// Connector whose sessions record every request per host.
#[derive(Clone, Debug, Default)]
pub struct RecordingConnector {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingConnector {
    /// Refuses every connection to `host`.
    #[must_use]
    pub fn refusing(self, host: &str) -> Self {
        self.recorded.lock().refused.insert(host.to_string());
        self
    }

    /// Fails any command on `host` that contains `fragment`.
    #[must_use]
    pub fn failing(self, host: &str, fragment: &str) -> Self {
        self.recorded
            .lock()
            .failing
            .push((host.to_string(), fragment.to_string()));
        self
    }

    /// Hosts that were connected to, sorted.
    pub fn hosts(&self) -> Vec<String> {
        self.recorded.lock().events.keys().cloned().collect()
    }

    /// Events recorded for `host`.
    pub fn events(&self, host: &str) -> Vec<Event> {
        self.recorded
            .lock()
            .events
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    /// Connection attempts made to `host`.
    pub fn connects(&self, host: &str) -> u32 {
        self.recorded
            .lock()
            .connects
            .get(host)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    type Session = RecordingSession;

    async fn connect(&self, host: &str) -> Result<RecordingSession> {
        let mut recorded = self.recorded.lock();
        *recorded.connects.entry(host.to_string()).or_default() += 1;
        if recorded.refused.contains(host) {
            return Err(Error::Io(
                "connect",
                std::io::ErrorKind::ConnectionRefused.into(),
            ));
        }
        recorded.events.entry(host.to_string()).or_default();

        Ok(RecordingSession {
            host: host.to_string(),
            recorded: self.recorded.clone(),
        })
    }
}

/// Session handed out by [`RecordingConnector`].
#[derive(Debug)]
pub struct RecordingSession {
    host: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingSession {
    fn push(&self, event: Event) {
        self.recorded
            .lock()
            .events
            .entry(self.host.clone())
            .or_default()
            .push(event);
    }

    fn check(&self, command: &str) -> Result<()> {
        let recorded = self.recorded.lock();
        let fails = recorded
            .failing
            .iter()
            .any(|(host, fragment)| *host == self.host && command.contains(fragment.as_str()));
        if fails {
            return Err(Error::CommandFailed {
                host: self.host.clone(),
                command: command.to_string(),
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Session for RecordingSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.push(Event::Run(command.to_string()));
        self.check(command)?;
        Ok(CommandOutput::default())
    }

    async fn run_tolerant(&self, command: &str) -> Result<CommandOutput> {
        self.push(Event::Run(command.to_string()));
        Ok(CommandOutput::default())
    }

    async fn run_detached(&self, command: &str) -> Result<()> {
        self.push(Event::Detached(command.to_string()));
        self.check(command)
    }

    async fn put_file(&self, source: &FileSource, remote_path: &str) -> Result<()> {
        let contents = String::from_utf8_lossy(&source.read().await?).into_owned();
        self.push(Event::Upload {
            path: remote_path.to_string(),
            contents,
        });
        Ok(())
    }

    async fn run_interactive(&self, command: &str, _script: &ExpectScript) -> Result<String> {
        self.push(Event::Interactive(command.to_string()));
        self.check(command)?;
        Ok(String::new())
    }

    async fn close(&self) -> Result<()> {
        self.push(Event::Close);
        Ok(())
    }
}

/// Transport that records probed targets and answers according to `up`.
#[derive(Clone, Debug)]
pub struct RecordingTransport {
    up: bool,
    probed: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    /// Every target answers.
    pub fn up() -> Self {
        Self {
            up: true,
            probed: Arc::default(),
        }
    }

    /// No target ever answers.
    pub fn down() -> Self {
        Self {
            up: false,
            probed: Arc::default(),
        }
    }

    /// Distinct `address:port` targets probed, sorted.
    pub fn targets(&self) -> Vec<String> {
        let mut targets = self.probed.lock().clone();
        targets.sort();
        targets.dedup();
        targets
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn check(
        &self,
        address: &str,
        port: u16,
        _timeout: Duration,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.probed.lock().push(format!("{address}:{port}"));
        if self.up {
            Ok(())
        } else {
            Err("connection refused".into())
        }
    }
}

/// Uploads used for scalable bootstraps.
pub fn scale_out_assets() -> ScaleOutAssets {
    ScaleOutAssets {
        ssh_key: FileSource::from("ssh-key".to_string()),
        credentials_file: FileSource::from("AWSAccessKeyId=AKIA\nAWSSecretKey=secret\n".to_string()),
        configure_script: ExpectScript::default(),
        orchestrator_binary: FileSource::from("binary".to_string()),
        orchestrator_config: Some(FileSource::from("max_nodes = 5\n".to_string())),
    }
}

pub type TestOrchestrator = Orchestrator<MockCloud, RecordingConnector, RecordingTransport>;

/// An orchestrator over fakes, with handles to inspect them.
pub struct Harness {
    pub cloud: MockCloud,
    pub connector: RecordingConnector,
    pub transport: RecordingTransport,
    pub cancel: CancellationToken,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    pub fn new(cloud: MockCloud) -> Self {
        Self::with(cloud, RecordingConnector::default(), RecordingTransport::up())
    }

    pub fn with(
        cloud: MockCloud,
        connector: RecordingConnector,
        transport: RecordingTransport,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ctx = RuntimeContext::new(
            Config::default(),
            cloud.clone(),
            connector.clone(),
            Prober::new(transport.clone(), Duration::from_secs(5)),
            cancel.clone(),
        )
        .with_scale_out(scale_out_assets());

        Self {
            cloud,
            connector,
            transport,
            cancel,
            orchestrator: Orchestrator::new(ctx),
        }
    }
}
