//! Per-invocation cluster parameters.

use pasture_cloud::{InstanceRequest, Tag};

use crate::config::Config;

/// What a single `create` is asked to build. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterSpec {
    /// Number of nodes to launch.
    pub node_count: u32,

    /// Availability zone.
    pub zone: String,

    /// Machine image.
    pub image_id: String,

    /// Instance size.
    pub instance_type: String,

    /// Cache server port.
    pub cache_port: u16,

    /// Whether nodes are bootstrapped to grow the cluster themselves.
    pub scalable: bool,
}

impl ClusterSpec {
    /// Builds a spec from config and command line values.
    #[must_use]
    pub fn new(config: &Config, node_count: u32, scalable: bool) -> Self {
        Self {
            node_count,
            zone: config.zone.clone(),
            image_id: config.image_id.clone(),
            instance_type: config.instance_type.clone(),
            cache_port: config.cache_port,
            scalable,
        }
    }

    /// The instance request for this spec's nodes.
    #[must_use]
    pub fn instance_request(&self, config: &Config) -> InstanceRequest {
        InstanceRequest {
            image_id: self.image_id.clone(),
            instance_type: self.instance_type.clone(),
            key_name: config.key_name.clone(),
            zone: self.zone.clone(),
            firewall_name: config.names.security_group.clone(),
            volume_size_gib: config.volume_size_gib,
            member_tag: member_tag(config),
        }
    }
}

/// The tag every cluster member carries.
#[must_use]
pub fn member_tag(config: &Config) -> Tag {
    Tag::new(
        config.names.member_tag_key.clone(),
        config.names.member_tag_value.clone(),
    )
}
