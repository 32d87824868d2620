//! Provisioner traits implemented by cloud backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    BalancerType, FirewallPolicy, InstanceRequest, NodeRecord, PendingInstance, Protocol,
    Result, Scheme, Tag,
};

/// Resolves network placement and manages the firewall policy.
#[async_trait]
pub trait NetworkProvisioner
where
    Self: Send + Sync + 'static,
{
    /// Returns the id of the network marked as default.
    async fn resolve_default_network(&self) -> Result<String>;

    /// Returns the subnet of `network_id` located in `zone`.
    async fn resolve_subnet(&self, network_id: &str, zone: &str) -> Result<String>;

    /// Creates the policy and authorizes its rules. Never checks for an
    /// existing policy first; a name collision is
    /// [`Error::DuplicateResource`](crate::Error::DuplicateResource).
    async fn create_firewall_policy(
        &self,
        network_id: &str,
        policy: &FirewallPolicy,
    ) -> Result<String>;

    /// Looks a policy up by name.
    async fn find_firewall_policy(&self, name: &str) -> Result<String>;

    /// Deletes a policy. Fails while instances still reference it.
    async fn delete_firewall_policy(&self, firewall_id: &str) -> Result<()>;
}

/// Creates, discovers and terminates cluster instances.
#[async_trait]
pub trait ComputeProvisioner
where
    Self: Send + Sync + 'static,
{
    /// Requests `count` instances in one call and tags them with ordinals
    /// starting at `first_ordinal`. Returns as soon as the request is
    /// accepted.
    async fn create_instances(
        &self,
        request: &InstanceRequest,
        count: u32,
        first_ordinal: u32,
    ) -> Result<Vec<PendingInstance>>;

    /// Blocks on the provider until the instance is running, then re-reads
    /// it for its public address.
    async fn await_running(
        &self,
        instance: &PendingInstance,
        max_wait: Duration,
    ) -> Result<NodeRecord>;

    /// Running instances carrying `member_tag`, sorted by ordinal.
    async fn list_running_members(&self, member_tag: &Tag) -> Result<Vec<NodeRecord>>;

    /// Ids of every non-terminated instance carrying `member_tag`.
    async fn list_members(&self, member_tag: &Tag) -> Result<Vec<String>>;

    /// Starts termination of the given instances.
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;

    /// Blocks until every given instance has terminated.
    async fn await_terminated(&self, instance_ids: &[String], max_wait: Duration) -> Result<()>;
}

/// Builds and removes the cluster's load balancer.
#[async_trait]
pub trait LoadBalancerProvisioner
where
    Self: Send + Sync + 'static,
{
    /// Creates a target group forwarding `protocol` traffic to `port`.
    async fn create_target_group(
        &self,
        name: &str,
        protocol: Protocol,
        port: u16,
        network_id: &str,
    ) -> Result<String>;

    /// Registers instances as targets on `port`.
    async fn register_targets(
        &self,
        target_group_id: &str,
        instance_ids: &[String],
        port: u16,
    ) -> Result<()>;

    /// Creates the balancer in a single subnet.
    async fn create_balancer(
        &self,
        name: &str,
        subnet_id: &str,
        scheme: Scheme,
        balancer_type: BalancerType,
    ) -> Result<String>;

    /// Creates a listener forwarding to the target group.
    async fn create_listener(
        &self,
        balancer_id: &str,
        protocol: Protocol,
        port: u16,
        target_group_id: &str,
    ) -> Result<String>;

    /// Blocks until the provider reports the balancer as active.
    async fn await_available(&self, balancer_id: &str, max_wait: Duration) -> Result<()>;

    /// Public DNS name of the balancer.
    async fn resolve_dns_name(&self, balancer_id: &str) -> Result<String>;

    /// Looks a balancer up by name.
    async fn find_balancer(&self, name: &str) -> Result<String>;

    /// Looks a target group up by name.
    async fn find_target_group(&self, name: &str) -> Result<String>;

    /// Deletes a balancer together with its listeners.
    async fn delete_balancer(&self, balancer_id: &str) -> Result<()>;

    /// Deletes a target group.
    async fn delete_target_group(&self, target_group_id: &str) -> Result<()>;
}

/// A backend providing every provisioner the orchestrator needs.
pub trait CloudProvider:
    NetworkProvisioner + ComputeProvisioner + LoadBalancerProvisioner
{
}

impl<T> CloudProvider for T where
    T: NetworkProvisioner + ComputeProvisioner + LoadBalancerProvisioner
{
}
