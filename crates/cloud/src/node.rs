//! Compute instance types.

/// Tag key carrying a node's ordinal index.
pub const ORDINAL_TAG_KEY: &str = "pasture:ordinal";

/// A key/value resource tag.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Tag {
    /// Tag key.
    pub key: String,

    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The ordinal tag for the node at `ordinal`.
    #[must_use]
    pub fn ordinal(ordinal: u32) -> Self {
        Self::new(ORDINAL_TAG_KEY, ordinal.to_string())
    }
}

/// Parameters for a batch of cluster instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Machine image to boot.
    pub image_id: String,

    /// Instance size.
    pub instance_type: String,

    /// Key pair installed for SSH access.
    pub key_name: String,

    /// Availability zone to place instances in.
    pub zone: String,

    /// Name of the firewall policy to attach.
    pub firewall_name: String,

    /// Root volume size in GiB.
    pub volume_size_gib: i32,

    /// Tag identifying cluster members.
    pub member_tag: Tag,
}

/// An instance that has been requested but not yet observed running.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingInstance {
    /// Provider instance id.
    pub instance_id: String,

    /// Ordinal index assigned at creation.
    pub ordinal: u32,
}

/// A provisioned compute instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    /// Provider instance id.
    pub instance_id: String,

    /// Public DNS name (or address) used for SSH, probes and the roster.
    pub public_address: String,

    /// Position in the roster, assigned in creation order.
    pub ordinal: u32,

    /// Whether the provider reports the instance as running.
    pub running: bool,
}

impl NodeRecord {
    /// Creates a record for a running instance.
    pub fn running(
        instance_id: impl Into<String>,
        public_address: impl Into<String>,
        ordinal: u32,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            public_address: public_address.into(),
            ordinal,
            running: true,
        }
    }
}
