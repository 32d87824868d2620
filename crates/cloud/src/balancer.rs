//! Load balancer types.

/// Whether a balancer is reachable from the internet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Scheme {
    /// Public entry point.
    #[default]
    InternetFacing,

    /// Reachable only inside the network.
    Internal,
}

impl Scheme {
    /// Provider name of the scheme.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InternetFacing => "internet-facing",
            Self::Internal => "internal",
        }
    }
}

/// Balancer flavour.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BalancerType {
    /// Layer 4 balancer.
    #[default]
    Network,

    /// Layer 7 balancer.
    Application,
}

impl BalancerType {
    /// Provider name of the balancer type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Application => "application",
        }
    }
}

/// The cluster's external entry point.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadBalancerContext {
    /// Target group forwarding to the cache port.
    pub target_group_id: String,

    /// Balancer id.
    pub balancer_id: String,

    /// Listener id.
    pub listener_id: String,

    /// Public DNS name of the balancer.
    pub dns_name: String,
}
