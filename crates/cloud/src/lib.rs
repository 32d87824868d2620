//! Abstract interface for provisioning a cache cluster on a cloud provider.
//!
//! This crate provides:
//! - The cluster data model (nodes, network placement, firewall, balancer)
//! - Provisioner traits implemented by cloud backends
//! - A shared error type with not-found / duplicate classification
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod balancer;
pub mod error;
pub mod network;
pub mod node;
pub mod provisioner;

pub use balancer::{BalancerType, LoadBalancerContext, Scheme};
pub use error::{Error, ResourceKind, Result};
pub use network::{FirewallPolicy, IngressRule, NetworkContext, Protocol};
pub use node::{InstanceRequest, NodeRecord, ORDINAL_TAG_KEY, PendingInstance, Tag};
pub use provisioner::{
    CloudProvider, ComputeProvisioner, LoadBalancerProvisioner, NetworkProvisioner,
};
