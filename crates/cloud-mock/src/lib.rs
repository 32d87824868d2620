//! In-memory cloud provider for tests and local dry runs.
//!
//! `MockCloud` keeps every resource in process memory, reports instances as
//! running (and balancers as active) only after a scripted number of polls,
//! enforces name uniqueness and reference rules the way a real provider does,
//! and records every call so tests can assert on what was asked of it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pasture_cloud::{
    BalancerType, ComputeProvisioner, Error, FirewallPolicy, InstanceRequest,
    LoadBalancerProvisioner, NetworkProvisioner, NodeRecord, PendingInstance, Protocol,
    ResourceKind, Result, Scheme, Tag,
};
use tracing::debug;

/// Default zone that has a subnet in the mock's default network.
pub const DEFAULT_ZONE: &str = "us-east-1b";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InstanceState {
    Pending { polls_left: u32 },
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Clone, Debug)]
struct MockInstance {
    id: String,
    address: String,
    ordinal: u32,
    tags: Vec<Tag>,
    firewall: String,
    state: InstanceState,
}

#[derive(Clone, Debug)]
struct MockBalancer {
    id: String,
    polls_left: u32,
    dns_name: String,
    listeners: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    default_network: Option<String>,
    subnets: BTreeMap<String, String>,
    firewalls: BTreeMap<String, String>,
    instances: Vec<MockInstance>,
    target_groups: BTreeMap<String, (String, Vec<String>)>,
    balancers: BTreeMap<String, MockBalancer>,
    next_id: u32,
    next_address: u32,
    calls: Vec<String>,
    running_polls: u32,
    balancer_polls: u32,
    failing: HashSet<&'static str>,
}

impl State {
    fn record(&mut self, operation: &'static str) -> Result<()> {
        debug!("mock cloud: {}", operation);
        self.calls.push(operation.to_string());
        if self.failing.contains(operation) {
            return Err(Error::Provider {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }
}

/// In-memory implementation of every provisioner trait.
#[derive(Clone, Debug)]
pub struct MockCloud {
    state: Arc<Mutex<State>>,
    polls_until_running: u32,
    polls_until_active: u32,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    /// Creates a provider with a default network, one subnet in
    /// [`DEFAULT_ZONE`], and instances/balancers that come up after two
    /// polls.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State {
            default_network: Some("vpc-default".to_string()),
            ..State::default()
        };
        state
            .subnets
            .insert(DEFAULT_ZONE.to_string(), "subnet-default".to_string());

        Self {
            state: Arc::new(Mutex::new(state)),
            polls_until_running: 2,
            polls_until_active: 2,
        }
    }

    /// Sets how many polls a new instance needs before it reports running.
    #[must_use]
    pub const fn with_polls_until_running(mut self, polls: u32) -> Self {
        self.polls_until_running = polls;
        self
    }

    /// Sets how many polls a new balancer needs before it reports active.
    #[must_use]
    pub const fn with_polls_until_active(mut self, polls: u32) -> Self {
        self.polls_until_active = polls;
        self
    }

    /// Removes the default network marker.
    #[must_use]
    pub fn without_default_network(self) -> Self {
        self.state.lock().default_network = None;
        self
    }

    /// Adds a subnet for `zone`.
    #[must_use]
    pub fn with_subnet(self, zone: &str, subnet_id: &str) -> Self {
        self.state
            .lock()
            .subnets
            .insert(zone.to_string(), subnet_id.to_string());
        self
    }

    /// Makes every call to `operation` fail with a provider error.
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        self.state.lock().failing.insert(operation);
        self
    }

    /// Seeds `count` running cluster members with ordinals `0..count`, as
    /// left behind by an earlier `create`.
    #[must_use]
    pub fn with_running_members(self, member_tag: &Tag, firewall: &str, count: u32) -> Self {
        {
            let mut state = self.state.lock();
            for ordinal in 0..count {
                let id = state.id("i");
                let address = format!("h{}", state.next_address);
                state.next_address += 1;
                state.instances.push(MockInstance {
                    id,
                    address,
                    ordinal,
                    tags: vec![member_tag.clone(), Tag::ordinal(ordinal)],
                    firewall: firewall.to_string(),
                    state: InstanceState::Running,
                });
            }
        }
        self
    }

    /// Operation names in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Total polls spent waiting for instances to run.
    #[must_use]
    pub fn running_polls(&self) -> u32 {
        self.state.lock().running_polls
    }

    /// Total polls spent waiting for balancers to become active.
    #[must_use]
    pub fn balancer_polls(&self) -> u32 {
        self.state.lock().balancer_polls
    }

    /// Ids of targets registered in the named target group.
    #[must_use]
    pub fn registered_targets(&self, target_group: &str) -> Vec<String> {
        self.state
            .lock()
            .target_groups
            .get(target_group)
            .map(|(_, targets)| targets.clone())
            .unwrap_or_default()
    }

    /// Number of instances that have not terminated.
    #[must_use]
    pub fn live_instance_count(&self) -> usize {
        self.state
            .lock()
            .instances
            .iter()
            .filter(|i| i.state != InstanceState::Terminated)
            .count()
    }

    /// Returns true if a firewall policy with `name` exists.
    #[must_use]
    pub fn has_firewall(&self, name: &str) -> bool {
        self.state.lock().firewalls.contains_key(name)
    }

    /// Returns true if a balancer with `name` exists.
    #[must_use]
    pub fn has_balancer(&self, name: &str) -> bool {
        self.state.lock().balancers.contains_key(name)
    }
}

#[async_trait]
impl NetworkProvisioner for MockCloud {
    async fn resolve_default_network(&self) -> Result<String> {
        let mut state = self.state.lock();
        state.record("resolve_default_network")?;
        state.default_network.clone().ok_or(Error::NoDefaultNetwork)
    }

    async fn resolve_subnet(&self, _network_id: &str, zone: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.record("resolve_subnet")?;
        state
            .subnets
            .get(zone)
            .cloned()
            .ok_or_else(|| Error::NoSubnetForZone(zone.to_string()))
    }

    async fn create_firewall_policy(
        &self,
        _network_id: &str,
        policy: &FirewallPolicy,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.record("create_firewall_policy")?;
        if state.firewalls.contains_key(&policy.name) {
            return Err(Error::DuplicateResource {
                kind: ResourceKind::Firewall,
                name: policy.name.clone(),
            });
        }
        let id = state.id("sg");
        state.firewalls.insert(policy.name.clone(), id.clone());
        Ok(id)
    }

    async fn find_firewall_policy(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.record("find_firewall_policy")?;
        state.firewalls.get(name).cloned().ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Firewall,
            name: name.to_string(),
        })
    }

    async fn delete_firewall_policy(&self, firewall_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record("delete_firewall_policy")?;
        let name = state
            .firewalls
            .iter()
            .find(|(_, id)| id.as_str() == firewall_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Firewall,
                name: firewall_id.to_string(),
            })?;
        let referenced = state
            .instances
            .iter()
            .any(|i| i.firewall == name && i.state != InstanceState::Terminated);
        if referenced {
            return Err(Error::Provider {
                operation: "delete_firewall_policy",
                message: format!("{name} is still referenced by an instance"),
            });
        }
        state.firewalls.remove(&name);
        Ok(())
    }
}

#[async_trait]
impl ComputeProvisioner for MockCloud {
    async fn create_instances(
        &self,
        request: &InstanceRequest,
        count: u32,
        first_ordinal: u32,
    ) -> Result<Vec<PendingInstance>> {
        let mut state = self.state.lock();
        state.record("create_instances")?;
        if !state.firewalls.contains_key(&request.firewall_name) {
            return Err(Error::NotFound {
                kind: ResourceKind::Firewall,
                name: request.firewall_name.clone(),
            });
        }

        let mut pending = Vec::new();
        for offset in 0..count {
            let ordinal = first_ordinal + offset;
            let id = state.id("i");
            let address = format!("h{}", state.next_address);
            state.next_address += 1;
            state.instances.push(MockInstance {
                id: id.clone(),
                address,
                ordinal,
                tags: vec![request.member_tag.clone(), Tag::ordinal(ordinal)],
                firewall: request.firewall_name.clone(),
                state: InstanceState::Pending {
                    polls_left: self.polls_until_running,
                },
            });
            pending.push(PendingInstance {
                instance_id: id,
                ordinal,
            });
        }
        Ok(pending)
    }

    async fn await_running(
        &self,
        instance: &PendingInstance,
        _max_wait: Duration,
    ) -> Result<NodeRecord> {
        let mut state = self.state.lock();
        state.record("await_running")?;
        let mut polls = 0;
        let record = {
            let found = state
                .instances
                .iter_mut()
                .find(|i| i.id == instance.instance_id)
                .ok_or_else(|| Error::NotFound {
                    kind: ResourceKind::Instance,
                    name: instance.instance_id.clone(),
                })?;
            loop {
                match found.state {
                    InstanceState::Running => break,
                    InstanceState::Pending { polls_left: 0 } => {
                        found.state = InstanceState::Running;
                    }
                    InstanceState::Pending { polls_left } => {
                        polls += 1;
                        found.state = InstanceState::Pending {
                            polls_left: polls_left - 1,
                        };
                    }
                    InstanceState::ShuttingDown | InstanceState::Terminated => {
                        return Err(Error::WaitTimedOut(format!(
                            "{} to run; it was terminated",
                            found.id
                        )));
                    }
                }
            }
            NodeRecord::running(found.id.clone(), found.address.clone(), found.ordinal)
        };
        state.running_polls += polls;
        Ok(record)
    }

    async fn list_running_members(&self, member_tag: &Tag) -> Result<Vec<NodeRecord>> {
        let mut state = self.state.lock();
        state.record("list_running_members")?;
        let mut nodes: Vec<NodeRecord> = state
            .instances
            .iter()
            .filter(|i| i.state == InstanceState::Running && i.tags.contains(member_tag))
            .map(|i| NodeRecord::running(i.id.clone(), i.address.clone(), i.ordinal))
            .collect();
        nodes.sort_by_key(|n| n.ordinal);
        Ok(nodes)
    }

    async fn list_members(&self, member_tag: &Tag) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        state.record("list_members")?;
        Ok(state
            .instances
            .iter()
            .filter(|i| i.state != InstanceState::Terminated && i.tags.contains(member_tag))
            .map(|i| i.id.clone())
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        state.record("terminate_instances")?;
        for instance in &mut state.instances {
            if instance_ids.contains(&instance.id) && instance.state != InstanceState::Terminated
            {
                instance.state = InstanceState::ShuttingDown;
            }
        }
        Ok(())
    }

    async fn await_terminated(&self, instance_ids: &[String], _max_wait: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.record("await_terminated")?;
        for instance in &mut state.instances {
            if instance_ids.contains(&instance.id) {
                if instance.state != InstanceState::ShuttingDown
                    && instance.state != InstanceState::Terminated
                {
                    return Err(Error::WaitTimedOut(format!(
                        "{} to terminate; termination was never requested",
                        instance.id
                    )));
                }
                instance.state = InstanceState::Terminated;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerProvisioner for MockCloud {
    async fn create_target_group(
        &self,
        name: &str,
        _protocol: Protocol,
        _port: u16,
        _network_id: &str,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.record("create_target_group")?;
        if state.target_groups.contains_key(name) {
            return Err(Error::DuplicateResource {
                kind: ResourceKind::TargetGroup,
                name: name.to_string(),
            });
        }
        let id = state.id("tg");
        state
            .target_groups
            .insert(name.to_string(), (id.clone(), Vec::new()));
        Ok(id)
    }

    async fn register_targets(
        &self,
        target_group_id: &str,
        instance_ids: &[String],
        _port: u16,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.record("register_targets")?;
        let (_, targets) = state
            .target_groups
            .values_mut()
            .find(|(id, _)| id == target_group_id)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::TargetGroup,
                name: target_group_id.to_string(),
            })?;
        targets.extend(instance_ids.iter().cloned());
        Ok(())
    }

    async fn create_balancer(
        &self,
        name: &str,
        _subnet_id: &str,
        _scheme: Scheme,
        _balancer_type: BalancerType,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.record("create_balancer")?;
        if state.balancers.contains_key(name) {
            return Err(Error::DuplicateResource {
                kind: ResourceKind::LoadBalancer,
                name: name.to_string(),
            });
        }
        let id = state.id("lb");
        state.balancers.insert(
            name.to_string(),
            MockBalancer {
                id: id.clone(),
                polls_left: self.polls_until_active,
                dns_name: format!("{name}.elb.mock"),
                listeners: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn create_listener(
        &self,
        balancer_id: &str,
        _protocol: Protocol,
        _port: u16,
        _target_group_id: &str,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.record("create_listener")?;
        let id = state.id("listener");
        let balancer = state
            .balancers
            .values_mut()
            .find(|b| b.id == balancer_id)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::LoadBalancer,
                name: balancer_id.to_string(),
            })?;
        balancer.listeners.push(id.clone());
        Ok(id)
    }

    async fn await_available(&self, balancer_id: &str, _max_wait: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.record("await_available")?;
        let balancer = state
            .balancers
            .values_mut()
            .find(|b| b.id == balancer_id)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::LoadBalancer,
                name: balancer_id.to_string(),
            })?;
        let polls = balancer.polls_left;
        balancer.polls_left = 0;
        state.balancer_polls += polls;
        Ok(())
    }

    async fn resolve_dns_name(&self, balancer_id: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.record("resolve_dns_name")?;
        state
            .balancers
            .values()
            .find(|b| b.id == balancer_id)
            .map(|b| b.dns_name.clone())
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::LoadBalancer,
                name: balancer_id.to_string(),
            })
    }

    async fn find_balancer(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.record("find_balancer")?;
        state
            .balancers
            .get(name)
            .map(|b| b.id.clone())
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::LoadBalancer,
                name: name.to_string(),
            })
    }

    async fn find_target_group(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.record("find_target_group")?;
        state
            .target_groups
            .get(name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::TargetGroup,
                name: name.to_string(),
            })
    }

    async fn delete_balancer(&self, balancer_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record("delete_balancer")?;
        let name = state
            .balancers
            .iter()
            .find(|(_, b)| b.id == balancer_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::LoadBalancer,
                name: balancer_id.to_string(),
            })?;
        if let Some(balancer) = state.balancers.remove(&name) {
            debug!(
                "mock cloud: removed {} with {} listeners",
                name,
                balancer.listeners.len()
            );
        }
        Ok(())
    }

    async fn delete_target_group(&self, target_group_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record("delete_target_group")?;
        let before = state.target_groups.len();
        state.target_groups.retain(|_, (id, _)| id != target_group_id);
        if state.target_groups.len() == before {
            return Err(Error::NotFound {
                kind: ResourceKind::TargetGroup,
                name: target_group_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_tag() -> Tag {
        Tag::new("Name", "CacheCow Node")
    }

    fn request() -> InstanceRequest {
        InstanceRequest {
            image_id: "ami-test".to_string(),
            instance_type: "t3.medium".to_string(),
            key_name: "CacheCow".to_string(),
            zone: DEFAULT_ZONE.to_string(),
            firewall_name: "cachecow-security".to_string(),
            volume_size_gib: 16,
            member_tag: member_tag(),
        }
    }

    #[tokio::test]
    async fn test_instances_run_after_scripted_polls() {
        let cloud = MockCloud::new().with_polls_until_running(2);
        let policy = FirewallPolicy::for_cluster("cachecow-security", 7070, 3000);
        cloud
            .create_firewall_policy("vpc-default", &policy)
            .await
            .unwrap();

        let pending = cloud.create_instances(&request(), 3, 0).await.unwrap();
        for instance in &pending {
            let node = cloud
                .await_running(instance, Duration::from_secs(1))
                .await
                .unwrap();
            assert!(node.running);
            assert_eq!(node.ordinal, instance.ordinal);
        }

        assert_eq!(cloud.running_polls(), 6);
        let members = cloud.list_running_members(&member_tag()).await.unwrap();
        let addresses: Vec<_> = members.iter().map(|n| n.public_address.as_str()).collect();
        assert_eq!(addresses, ["h0", "h1", "h2"]);
    }

    #[tokio::test]
    async fn test_duplicate_firewall_is_rejected() {
        let cloud = MockCloud::new();
        let policy = FirewallPolicy::for_cluster("cachecow-security", 7070, 3000);

        cloud
            .create_firewall_policy("vpc-default", &policy)
            .await
            .unwrap();
        let err = cloud
            .create_firewall_policy("vpc-default", &policy)
            .await
            .unwrap_err();

        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_firewall_cannot_be_deleted_while_referenced() {
        let cloud = MockCloud::new();
        let policy = FirewallPolicy::for_cluster("cachecow-security", 7070, 3000);
        let firewall = cloud
            .create_firewall_policy("vpc-default", &policy)
            .await
            .unwrap();
        let pending = cloud.create_instances(&request(), 1, 0).await.unwrap();
        let ids: Vec<String> = pending.into_iter().map(|p| p.instance_id).collect();

        assert!(cloud.delete_firewall_policy(&firewall).await.is_err());

        cloud.terminate_instances(&ids).await.unwrap();
        assert!(cloud.delete_firewall_policy(&firewall).await.is_err());

        cloud
            .await_terminated(&ids, Duration::from_secs(1))
            .await
            .unwrap();
        cloud.delete_firewall_policy(&firewall).await.unwrap();
        assert!(!cloud.has_firewall("cachecow-security"));
    }

    #[tokio::test]
    async fn test_missing_zone_subnet() {
        let cloud = MockCloud::new();

        let err = cloud
            .resolve_subnet("vpc-default", "eu-west-1a")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoSubnetForZone(zone) if zone == "eu-west-1a"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let cloud = MockCloud::new().failing("create_balancer");

        let err = cloud
            .create_balancer(
                "cachecow-balancer",
                "subnet-default",
                Scheme::InternetFacing,
                BalancerType::Network,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Provider { operation: "create_balancer", .. }));
        assert_eq!(cloud.calls(), ["create_balancer"]);
    }
}
