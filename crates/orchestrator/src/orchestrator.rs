//! Cluster create, scale-out and teardown.

use std::future::Future;

use futures::future::join_all;
use pasture_cloud::{
    BalancerType, CloudProvider, FirewallPolicy, LoadBalancerContext, NetworkContext, NodeRecord,
    PendingInstance, Protocol, Scheme,
};
use pasture_probe::Transport;
use pasture_remote::{BootstrapPlan, Connector, NodeParams, ScaleOutAssets, bootstrap};
use pasture_roster::Roster;
use tracing::{error, info, warn};

use crate::context::RuntimeContext;
use crate::error::{Error, Result};
use crate::spec::{ClusterSpec, member_tag};
use crate::state::{ClusterState, Progress};

/// Outcome of a successful `create` or `add`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterReport {
    /// Roster pushed to the nodes bootstrapped in this run.
    pub roster: Roster,

    /// Every running node, in ordinal order.
    pub nodes: Vec<NodeRecord>,

    /// Public DNS name of the balancer, if the cluster has one.
    pub balancer_dns: Option<String>,

    /// States visited, in order.
    pub states: Vec<ClusterState>,
}

/// Drives a cluster through its lifecycle.
#[derive(Debug)]
pub struct Orchestrator<P, C, T>
where
    P: CloudProvider,
    C: Connector,
    T: Transport,
{
    ctx: RuntimeContext<P, C, T>,
}

impl<P, C, T> Orchestrator<P, C, T>
where
    P: CloudProvider,
    C: Connector,
    T: Transport,
{
    /// Creates an orchestrator over `ctx`.
    pub const fn new(ctx: RuntimeContext<P, C, T>) -> Self {
        Self { ctx }
    }

    /// The runtime context.
    pub const fn context(&self) -> &RuntimeContext<P, C, T> {
        &self.ctx
    }

    /// Launches a new cluster of `spec.node_count` nodes behind a load
    /// balancer and waits until every node and the balancer answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] before touching the provider if the
    /// cluster would exceed the node limit. Resources created before a later
    /// failure are left in place for `delete`.
    pub async fn create(&self, spec: &ClusterSpec) -> Result<ClusterReport> {
        let config = &self.ctx.config;
        self.check_quota(0, spec.node_count)?;

        let scale_out = if spec.scalable {
            Some(self.scale_out_assets().await?)
        } else {
            None
        };

        info!(
            "Creating cluster of {} nodes in {}",
            spec.node_count, spec.zone
        );
        let mut progress = Progress::default();

        let network = self.resolve_network(&spec.zone).await?;
        progress.advance(ClusterState::NetworkResolved);

        let policy = FirewallPolicy::for_cluster(
            &config.names.security_group,
            config.cache_port,
            config.monitor_port,
        );
        self.cloud(
            self.ctx
                .provider
                .create_firewall_policy(&network.network_id, &policy),
        )
        .await?;
        progress.advance(ClusterState::FirewallReady);

        let pending = self.request_instances(spec, 0).await?;
        progress.advance(ClusterState::InstancesPending);
        let nodes = self.await_nodes(&pending).await?;
        progress.advance(ClusterState::InstancesRunning);

        let roster = Roster::build(&nodes, spec.cache_port);
        info!("Roster:\n{}", roster);

        self.bootstrap_nodes(&nodes, &roster, false, scale_out.as_ref())
            .await?;
        progress.advance(ClusterState::NodesBootstrapped);

        let balancer = self.build_balancer(&network, &nodes).await?;
        progress.advance(ClusterState::BalancerReady);

        let mut targets: Vec<&str> = nodes.iter().map(|n| n.public_address.as_str()).collect();
        targets.push(&balancer.dns_name);
        self.probe_all(&targets).await?;
        progress.advance(ClusterState::Live);

        info!("Cluster is live at {}", balancer.dns_name);

        Ok(ClusterReport {
            roster,
            nodes,
            balancer_dns: Some(balancer.dns_name),
            states: progress.into_history(),
        })
    }

    /// Adds `extra` autoscaling-capable nodes to the running cluster.
    ///
    /// New nodes get the full roster and are registered with the existing
    /// target group. Existing nodes are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] if the cluster would exceed the node
    /// limit, and [`Error::SparseOrdinals`] if a member has been lost since
    /// the roster was built. No instances are created in either case.
    pub async fn add(&self, extra: u32) -> Result<ClusterReport> {
        let config = &self.ctx.config;
        let tag = member_tag(config);

        let existing = self
            .cloud(self.ctx.provider.list_running_members(&tag))
            .await?;
        let existing_count = u32::try_from(existing.len()).unwrap_or(u32::MAX);
        info!("Existing instance count is {}", existing_count);

        check_dense(&existing)?;
        self.check_quota(existing_count, extra)?;
        let scale_out = self.scale_out_assets().await?;

        let mut progress = Progress::default();
        self.resolve_network(&config.zone).await?;
        progress.advance(ClusterState::NetworkResolved);

        let spec = ClusterSpec::new(config, extra, true);
        let pending = self.request_instances(&spec, existing_count).await?;
        progress.advance(ClusterState::InstancesPending);
        let added = self.await_nodes(&pending).await?;
        progress.advance(ClusterState::InstancesRunning);

        let nodes: Vec<NodeRecord> = existing.into_iter().chain(added.iter().cloned()).collect();
        let roster = Roster::build(&nodes, config.cache_port);
        info!("Roster:\n{}", roster);

        self.bootstrap_nodes(&added, &roster, true, Some(&scale_out))
            .await?;
        progress.advance(ClusterState::NodesBootstrapped);

        let balancer_dns = self.join_balancer(&added).await?;

        let targets: Vec<&str> = added.iter().map(|n| n.public_address.as_str()).collect();
        self.probe_all(&targets).await?;
        progress.advance(ClusterState::Live);

        info!("Added {} nodes; cluster has {}", added.len(), nodes.len());

        Ok(ClusterReport {
            roster,
            nodes,
            balancer_dns,
            states: progress.into_history(),
        })
    }

    /// Tears the cluster down: balancer, target group, instances, then the
    /// firewall policy.
    ///
    /// # Errors
    ///
    /// A resource missing by name fails with a not-found error and stops the
    /// teardown at that step.
    pub async fn delete(&self) -> Result<()> {
        let config = &self.ctx.config;
        let provider = &self.ctx.provider;
        info!("Tearing down cluster");

        let balancer_id = self.cloud(provider.find_balancer(&config.names.balancer)).await?;
        self.cloud(provider.delete_balancer(&balancer_id)).await?;

        let target_group_id = self
            .cloud(provider.find_target_group(&config.names.target_group))
            .await?;
        self.cloud(provider.delete_target_group(&target_group_id))
            .await?;

        let instance_ids = self
            .cloud(provider.list_members(&member_tag(config)))
            .await?;
        info!("Terminating {} instances", instance_ids.len());
        self.cloud(provider.terminate_instances(&instance_ids))
            .await?;
        self.cloud(
            provider.await_terminated(&instance_ids, config.timeouts.instance_terminated()),
        )
        .await?;

        let firewall_id = self
            .cloud(provider.find_firewall_policy(&config.names.security_group))
            .await?;
        self.cloud(provider.delete_firewall_policy(&firewall_id))
            .await?;

        info!("Cluster deleted");
        Ok(())
    }

    fn check_quota(&self, existing: u32, extra: u32) -> Result<()> {
        if extra == 0 {
            return Err(Error::Config("node count must be at least 1".to_string()));
        }

        let requested = existing.saturating_add(extra);
        let max = self.ctx.config.max_nodes;
        if requested > max {
            return Err(Error::QuotaExceeded { requested, max });
        }

        Ok(())
    }

    /// Races a provider call against cancellation.
    async fn cloud<F, R>(&self, call: F) -> Result<R>
    where
        F: Future<Output = pasture_cloud::Result<R>>,
    {
        tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => Err(Error::Cancelled),
            result = call => Ok(result?),
        }
    }

    async fn resolve_network(&self, zone: &str) -> Result<NetworkContext> {
        let provider = &self.ctx.provider;

        let network_id = self.cloud(provider.resolve_default_network()).await?;
        let subnet_id = self
            .cloud(provider.resolve_subnet(&network_id, zone))
            .await?;

        Ok(NetworkContext {
            network_id,
            subnet_id,
        })
    }

    async fn scale_out_assets(&self) -> Result<ScaleOutAssets> {
        if let Some(assets) = &self.ctx.scale_out {
            return Ok(assets.clone());
        }

        let config = &self.ctx.config;
        let binary = std::env::current_exe()
            .map_err(|e| Error::Config(format!("cannot locate orchestrator binary: {e}")))?;

        ScaleOutAssets::prepare(
            &config.ssh_key_path,
            &config.cloud_credentials_path,
            &config.region,
            &config.bootstrap,
            config.timeouts.prompt(),
            binary,
            Some(config.for_node().to_toml()?),
        )
        .await
        .map_err(Error::ScaleOut)
    }

    async fn request_instances(
        &self,
        spec: &ClusterSpec,
        first_ordinal: u32,
    ) -> Result<Vec<PendingInstance>> {
        let config = &self.ctx.config;

        self.cloud(self.ctx.provider.create_instances(
            &spec.instance_request(config),
            spec.node_count,
            first_ordinal,
        ))
        .await
    }

    /// Waits until every pending instance runs.
    async fn await_nodes(&self, pending: &[PendingInstance]) -> Result<Vec<NodeRecord>> {
        let timeout = self.ctx.config.timeouts.instance_running();

        let running = join_all(
            pending
                .iter()
                .map(|instance| self.cloud(self.ctx.provider.await_running(instance, timeout))),
        )
        .await;

        let mut nodes = running.into_iter().collect::<Result<Vec<_>>>()?;
        nodes.sort_by_key(|n| n.ordinal);
        Ok(nodes)
    }

    /// Bootstraps every node concurrently. All runs finish before the first
    /// failure is returned.
    async fn bootstrap_nodes(
        &self,
        nodes: &[NodeRecord],
        roster: &Roster,
        new_node: bool,
        scale_out: Option<&ScaleOutAssets>,
    ) -> Result<()> {
        let config = &self.ctx.config;
        let connect_policy = config.retry.connect.policy();

        let runs = nodes.iter().map(|node| {
            let plan = BootstrapPlan::build(
                &config.bootstrap,
                &NodeParams {
                    ordinal: node.ordinal,
                    cache_port: config.cache_port,
                    new_node,
                },
                roster,
                scale_out,
            );
            let connect_policy = &connect_policy;

            async move {
                let outcome = bootstrap(
                    &self.ctx.connector,
                    &node.public_address,
                    &plan,
                    connect_policy,
                    &self.ctx.cancel,
                )
                .await;
                (node, outcome)
            }
        });

        let mut first_failure = None;
        for (node, outcome) in join_all(runs).await {
            if let Err(e) = outcome {
                error!(
                    "Node {} ({}) failed at '{}': {}",
                    node.ordinal, node.public_address, e.step, e.source
                );
                first_failure.get_or_insert(Error::Bootstrap {
                    host: node.public_address.clone(),
                    ordinal: node.ordinal,
                    step: e.step,
                    source: e.source,
                });
            }
        }

        match first_failure {
            Some(e) if e.is_cancelled() => Err(Error::Cancelled),
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Puts the nodes behind a new network load balancer.
    async fn build_balancer(
        &self,
        network: &NetworkContext,
        nodes: &[NodeRecord],
    ) -> Result<LoadBalancerContext> {
        let config = &self.ctx.config;
        let provider = &self.ctx.provider;
        let instance_ids: Vec<String> = nodes.iter().map(|n| n.instance_id.clone()).collect();

        let target_group_id = self
            .cloud(provider.create_target_group(
                &config.names.target_group,
                Protocol::Tcp,
                config.cache_port,
                &network.network_id,
            ))
            .await?;
        self.cloud(provider.register_targets(&target_group_id, &instance_ids, config.cache_port))
            .await?;

        let balancer_id = self
            .cloud(provider.create_balancer(
                &config.names.balancer,
                &network.subnet_id,
                Scheme::InternetFacing,
                BalancerType::Network,
            ))
            .await?;
        let listener_id = self
            .cloud(provider.create_listener(
                &balancer_id,
                Protocol::Tcp,
                config.cache_port,
                &target_group_id,
            ))
            .await?;

        self.cloud(provider.await_available(&balancer_id, config.timeouts.balancer_available()))
            .await?;
        let dns_name = self.cloud(provider.resolve_dns_name(&balancer_id)).await?;
        info!("Load balancer DNS name is {}", dns_name);

        Ok(LoadBalancerContext {
            target_group_id,
            balancer_id,
            listener_id,
            dns_name,
        })
    }

    /// Registers new nodes with the existing target group and returns the
    /// balancer's DNS name. A cluster without a balancer is left as is.
    async fn join_balancer(&self, added: &[NodeRecord]) -> Result<Option<String>> {
        let config = &self.ctx.config;
        let provider = &self.ctx.provider;

        match self
            .cloud(provider.find_target_group(&config.names.target_group))
            .await
        {
            Ok(target_group_id) => {
                let instance_ids: Vec<String> =
                    added.iter().map(|n| n.instance_id.clone()).collect();
                self.cloud(provider.register_targets(
                    &target_group_id,
                    &instance_ids,
                    config.cache_port,
                ))
                .await?;
            }
            Err(Error::Cloud(e)) if e.is_not_found() => {
                warn!("No target group; new nodes are not behind a balancer");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        match self
            .cloud(provider.find_balancer(&config.names.balancer))
            .await
        {
            Ok(balancer_id) => Ok(Some(
                self.cloud(provider.resolve_dns_name(&balancer_id)).await?,
            )),
            Err(Error::Cloud(e)) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Waits until every target answers on the cache port.
    async fn probe_all(&self, targets: &[&str]) -> Result<()> {
        let config = &self.ctx.config;
        let policy = config.retry.probe.policy();

        let results = join_all(targets.iter().map(|target| {
            self.ctx
                .prober
                .wait_until_reachable(target, config.cache_port, &policy, &self.ctx.cancel)
        }))
        .await;

        for result in results {
            match result {
                Ok(()) => {}
                Err(pasture_probe::Error::Cancelled(_)) => return Err(Error::Cancelled),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

/// Nodes find themselves in the roster by ordinal, so live ordinals must be
/// exactly `0..n` before new ones are appended.
fn check_dense(existing: &[NodeRecord]) -> Result<()> {
    let found: Vec<u32> = existing.iter().map(|n| n.ordinal).collect();
    let dense = found
        .iter()
        .enumerate()
        .all(|(position, ordinal)| u32::try_from(position).is_ok_and(|p| p == *ordinal));

    if dense {
        Ok(())
    } else {
        error!("Live ordinals {:?} have gaps", found);
        Err(Error::SparseOrdinals { found })
    }
}
