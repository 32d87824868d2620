//! Instance lifecycle.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::client::Waiters;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, Instance, InstanceStateName, InstanceType,
    Placement, ResourceType, Tag as Ec2Tag, TagSpecification,
};
use pasture_cloud::{
    ComputeProvisioner, Error, InstanceRequest, NodeRecord, ORDINAL_TAG_KEY, PendingInstance,
    ResourceKind, Result, Tag,
};
use tracing::{debug, info};

use crate::AwsProvider;
use crate::error::{sdk, waiter};

/// Root device of the cluster image.
const ROOT_DEVICE: &str = "/dev/xvda";

fn ec2_tag(tag: &Tag) -> Ec2Tag {
    Ec2Tag::builder().key(&tag.key).value(&tag.value).build()
}

fn tag_filter(tag: &Tag) -> Filter {
    Filter::builder()
        .name(format!("tag:{}", tag.key))
        .values(&tag.value)
        .build()
}

/// A running member as read from the provider, before ordinals are settled.
#[derive(Clone, Debug)]
struct Member {
    instance_id: String,
    public_address: String,
    ordinal: Option<u32>,
    launched_at: i64,
}

impl Member {
    fn from_instance(instance: &Instance) -> Option<Self> {
        let ordinal = instance
            .tags()
            .iter()
            .find(|t| t.key() == Some(ORDINAL_TAG_KEY))
            .and_then(|t| t.value())
            .and_then(|v| v.parse().ok());

        Some(Self {
            instance_id: instance.instance_id()?.to_string(),
            public_address: instance
                .public_dns_name()
                .filter(|n| !n.is_empty())?
                .to_string(),
            ordinal,
            launched_at: instance.launch_time().map_or(i64::MAX, |t| t.secs()),
        })
    }
}

/// Orders members by ordinal tag. Untagged members follow in launch order
/// and get the next free ordinals.
fn settle_ordinals(mut members: Vec<Member>) -> Vec<NodeRecord> {
    members.sort_by_key(|m| (m.ordinal.is_none(), m.ordinal, m.launched_at));

    let mut next = members
        .iter()
        .filter_map(|m| m.ordinal)
        .max()
        .map_or(0, |max| max + 1);

    members
        .into_iter()
        .map(|m| {
            let ordinal = m.ordinal.unwrap_or_else(|| {
                let assigned = next;
                next += 1;
                assigned
            });
            NodeRecord::running(m.instance_id, m.public_address, ordinal)
        })
        .collect()
}

impl AwsProvider {
    async fn describe_instance(&self, instance_id: &str) -> Result<Instance> {
        self.ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk("describe_instances", ResourceKind::Instance, instance_id, e))?
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Instance,
                name: instance_id.to_string(),
            })
    }

    async fn describe_members(&self, member_tag: &Tag, states: &[&str]) -> Result<Vec<Instance>> {
        let mut state_filter = Filter::builder().name("instance-state-name");
        for state in states {
            state_filter = state_filter.values(*state);
        }

        let resp = self
            .ec2
            .describe_instances()
            .filters(tag_filter(member_tag))
            .filters(state_filter.build())
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "describe_instances",
                    ResourceKind::Instance,
                    &member_tag.value,
                    e,
                )
            })?;

        Ok(resp
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ComputeProvisioner for AwsProvider {
    async fn create_instances(
        &self,
        request: &InstanceRequest,
        count: u32,
        first_ordinal: u32,
    ) -> Result<Vec<PendingInstance>> {
        let count = i32::try_from(count).map_err(|_| Error::Provider {
            operation: "run_instances",
            message: format!("cannot request {count} instances"),
        })?;

        info!(
            "Requesting {} {} instances in {}",
            count, request.instance_type, request.zone
        );

        let resp = self
            .ec2
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .key_name(&request.key_name)
            .min_count(count)
            .max_count(count)
            .placement(
                Placement::builder()
                    .availability_zone(&request.zone)
                    .build(),
            )
            .security_groups(&request.firewall_name)
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(ROOT_DEVICE)
                    .ebs(
                        EbsBlockDevice::builder()
                            .volume_size(request.volume_size_gib)
                            .build(),
                    )
                    .build(),
            )
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(ec2_tag(&request.member_tag))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "run_instances",
                    ResourceKind::Instance,
                    &request.member_tag.value,
                    e,
                )
            })?;

        let mut pending = Vec::new();
        for (ordinal, instance) in (first_ordinal..).zip(resp.instances()) {
            let instance_id = instance
                .instance_id()
                .ok_or(Error::MissingDetails("instance id"))?
                .to_string();

            self.ec2
                .create_tags()
                .resources(&instance_id)
                .tags(ec2_tag(&Tag::ordinal(ordinal)))
                .send()
                .await
                .map_err(|e| sdk("create_tags", ResourceKind::Instance, &instance_id, e))?;

            debug!("Instance {} has ordinal {}", instance_id, ordinal);
            pending.push(PendingInstance {
                instance_id,
                ordinal,
            });
        }

        Ok(pending)
    }

    async fn await_running(
        &self,
        instance: &PendingInstance,
        max_wait: Duration,
    ) -> Result<NodeRecord> {
        self.ec2
            .wait_until_instance_running()
            .instance_ids(&instance.instance_id)
            .wait(max_wait)
            .await
            .map_err(|e| waiter(format!("{} to run", instance.instance_id), e))?;

        let described = self.describe_instance(&instance.instance_id).await?;
        let public_address = described
            .public_dns_name()
            .filter(|n| !n.is_empty())
            .ok_or(Error::MissingDetails("public DNS name"))?;

        info!(
            "Instance {} is running at {}",
            instance.instance_id, public_address
        );

        Ok(NodeRecord::running(
            instance.instance_id.clone(),
            public_address,
            instance.ordinal,
        ))
    }

    async fn list_running_members(&self, member_tag: &Tag) -> Result<Vec<NodeRecord>> {
        let instances = self
            .describe_members(member_tag, &[InstanceStateName::Running.as_str()])
            .await?;

        Ok(settle_ordinals(
            instances.iter().filter_map(Member::from_instance).collect(),
        ))
    }

    async fn list_members(&self, member_tag: &Tag) -> Result<Vec<String>> {
        let states = [
            InstanceStateName::Pending,
            InstanceStateName::Running,
            InstanceStateName::ShuttingDown,
            InstanceStateName::Stopping,
            InstanceStateName::Stopped,
        ];
        let states: Vec<&str> = states.iter().map(InstanceStateName::as_str).collect();

        Ok(self
            .describe_members(member_tag, &states)
            .await?
            .iter()
            .filter_map(|i| i.instance_id().map(ToString::to_string))
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }

        self.ec2
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "terminate_instances",
                    ResourceKind::Instance,
                    &instance_ids.join(","),
                    e,
                )
            })?;

        info!("Terminating {} instances", instance_ids.len());
        Ok(())
    }

    async fn await_terminated(&self, instance_ids: &[String], max_wait: Duration) -> Result<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }

        self.ec2
            .wait_until_instance_terminated()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .wait(max_wait)
            .await
            .map_err(|e| waiter(format!("{} instances to terminate", instance_ids.len()), e))?;

        info!("{} instances terminated", instance_ids.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, ordinal: Option<u32>, launched_at: i64) -> Member {
        Member {
            instance_id: id.to_string(),
            public_address: format!("{id}.compute.amazonaws.com"),
            ordinal,
            launched_at,
        }
    }

    #[test]
    fn test_members_sorted_by_ordinal_tag() {
        let nodes = settle_ordinals(vec![
            member("i-c", Some(2), 10),
            member("i-a", Some(0), 30),
            member("i-b", Some(1), 20),
        ]);

        let ids: Vec<_> = nodes.iter().map(|n| n.instance_id.as_str()).collect();
        assert_eq!(ids, ["i-a", "i-b", "i-c"]);
    }

    #[test]
    fn test_untagged_members_follow_in_launch_order() {
        let nodes = settle_ordinals(vec![
            member("i-late", None, 50),
            member("i-a", Some(0), 10),
            member("i-early", None, 40),
            member("i-b", Some(1), 10),
        ]);

        let order: Vec<_> = nodes
            .iter()
            .map(|n| (n.instance_id.as_str(), n.ordinal))
            .collect();
        assert_eq!(
            order,
            [("i-a", 0), ("i-b", 1), ("i-early", 2), ("i-late", 3)]
        );
    }

    #[test]
    fn test_member_from_instance_reads_ordinal_tag() {
        let instance = Instance::builder()
            .instance_id("i-0123")
            .public_dns_name("ec2-1-2-3-4.compute-1.amazonaws.com")
            .tags(ec2_tag(&Tag::new("Name", "CacheCow Node")))
            .tags(ec2_tag(&Tag::ordinal(7)))
            .build();

        let member = Member::from_instance(&instance).unwrap();

        assert_eq!(member.ordinal, Some(7));
        assert_eq!(member.public_address, "ec2-1-2-3-4.compute-1.amazonaws.com");
    }

    #[test]
    fn test_member_without_public_name_is_skipped() {
        let instance = Instance::builder().instance_id("i-0123").build();

        assert!(Member::from_instance(&instance).is_none());
    }
}
