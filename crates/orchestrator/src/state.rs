//! Orchestration progress.

use std::fmt;

use tracing::info;

/// Where a cluster operation has got to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterState {
    /// Nothing done yet.
    Idle,

    /// Default network and subnet resolved.
    NetworkResolved,

    /// Firewall policy created.
    FirewallReady,

    /// Instances requested.
    InstancesPending,

    /// Every requested instance is running.
    InstancesRunning,

    /// Every new node finished its bootstrap plan.
    NodesBootstrapped,

    /// The balancer is active and its DNS name known.
    BalancerReady,

    /// Every probed target answered.
    Live,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::NetworkResolved => "network resolved",
            Self::FirewallReady => "firewall ready",
            Self::InstancesPending => "instances pending",
            Self::InstancesRunning => "instances running",
            Self::NodesBootstrapped => "nodes bootstrapped",
            Self::BalancerReady => "balancer ready",
            Self::Live => "live",
        };
        f.write_str(name)
    }
}

/// Records and logs state transitions of one operation.
#[derive(Clone, Debug)]
pub struct Progress {
    history: Vec<ClusterState>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            history: vec![ClusterState::Idle],
        }
    }
}

impl Progress {
    /// Current state.
    #[must_use]
    pub fn current(&self) -> ClusterState {
        self.history
            .last()
            .copied()
            .unwrap_or(ClusterState::Idle)
    }

    /// Moves to `next`.
    pub fn advance(&mut self, next: ClusterState) {
        info!("Cluster state: {} -> {}", self.current(), next);
        self.history.push(next);
    }

    /// Every state visited, starting with [`ClusterState::Idle`].
    #[must_use]
    pub fn into_history(self) -> Vec<ClusterState> {
        self.history
    }
}
