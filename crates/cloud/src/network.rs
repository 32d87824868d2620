//! Virtual network and firewall types.

/// Port the SSH daemon listens on.
pub const SSH_PORT: u16 = 22;

/// CIDR matching any IPv4 source.
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Resolved network placement for a zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkContext {
    /// Virtual network id.
    pub network_id: String,

    /// Subnet id within the network for the target zone.
    pub subnet_id: String,
}

/// Transport protocol of a rule or listener.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Protocol {
    /// TCP.
    #[default]
    Tcp,
}

impl Protocol {
    /// Lowercase name as used in firewall rules.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
        }
    }
}

/// A single ingress rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRule {
    /// Destination port.
    pub port: u16,

    /// Protocol.
    pub protocol: Protocol,

    /// Allowed source range.
    pub source_cidr: String,
}

impl IngressRule {
    /// A TCP rule open to any IPv4 source.
    #[must_use]
    pub fn tcp_from_anywhere(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
            source_cidr: ANY_IPV4.to_string(),
        }
    }
}

/// A named ingress rule set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirewallPolicy {
    /// Group name; used to look the policy up again.
    pub name: String,

    /// Human readable description.
    pub description: String,

    /// Ingress rules.
    pub rules: Vec<IngressRule>,
}

impl FirewallPolicy {
    /// The policy a cache cluster needs: cache port, monitor port and SSH.
    #[must_use]
    pub fn for_cluster(name: &str, cache_port: u16, monitor_port: u16) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Ingress for cache cluster {name}"),
            rules: vec![
                IngressRule::tcp_from_anywhere(cache_port),
                IngressRule::tcp_from_anywhere(monitor_port),
                IngressRule::tcp_from_anywhere(SSH_PORT),
            ],
        }
    }
}
