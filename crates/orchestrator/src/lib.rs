//! Provisions, scales and tears down a cache cluster.
//!
//! An [`Orchestrator`] runs one operation against a [`RuntimeContext`]:
//! - `create` builds networking, instances, the roster, per-node bootstraps
//!   and the load balancer, then waits until everything answers
//! - `add` grows a running cluster with autoscaling-capable nodes
//! - `delete` removes every resource by name
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod context;
mod error;
mod orchestrator;
mod spec;
mod state;

pub use config::{Config, NamesConfig, RetryConfig, RetrySettings, TimeoutsConfig};
pub use context::RuntimeContext;
pub use error::{Error, Result};
pub use orchestrator::{ClusterReport, Orchestrator};
pub use spec::{ClusterSpec, member_tag};
pub use state::{ClusterState, Progress};
