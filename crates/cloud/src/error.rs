//! Error types for cloud provisioning.

use thiserror::Error;

/// Result type for provisioner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of provider resource an error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// A firewall rule set (security group).
    Firewall,

    /// A compute instance.
    Instance,

    /// A load balancer.
    LoadBalancer,

    /// A load balancer listener.
    Listener,

    /// A virtual network or one of its subnets.
    Network,

    /// A load balancer target group.
    TargetGroup,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Firewall => "firewall policy",
            Self::Instance => "instance",
            Self::LoadBalancer => "load balancer",
            Self::Listener => "listener",
            Self::Network => "network",
            Self::TargetGroup => "target group",
        };
        f.write_str(name)
    }
}

/// Errors returned by provisioners.
#[derive(Debug, Error)]
pub enum Error {
    /// Creating a resource whose name is already taken.
    #[error("{kind} '{name}' already exists; run delete first")]
    DuplicateResource {
        /// Kind of resource.
        kind: ResourceKind,

        /// Name that collided.
        name: String,
    },

    /// The provider response lacked a field we rely on.
    #[error("missing {0} in provider response")]
    MissingDetails(&'static str),

    /// No virtual network is marked as the default.
    #[error("no default network found")]
    NoDefaultNetwork,

    /// The default network has no subnet in the requested zone.
    #[error("no subnet for zone {0}")]
    NoSubnetForZone(String),

    /// A named resource does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of resource.
        kind: ResourceKind,

        /// Name or id that was looked up.
        name: String,
    },

    /// Any other provider failure.
    #[error("{operation} failed: {message}")]
    Provider {
        /// Provider operation that failed.
        operation: &'static str,

        /// Provider-supplied message.
        message: String,
    },

    /// A provider-side waiter gave up.
    #[error("timed out waiting for {0}")]
    WaitTimedOut(String),
}

impl Error {
    /// Returns true for lookup failures of named resources.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for name collisions.
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateResource { .. })
    }
}
