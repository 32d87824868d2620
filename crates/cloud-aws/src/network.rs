//! Default VPC, subnet and security group handling.

use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, IpPermission, IpRange};
use pasture_cloud::{Error, FirewallPolicy, NetworkProvisioner, ResourceKind, Result};
use tracing::info;

use crate::AwsProvider;
use crate::error::sdk;

#[async_trait]
impl NetworkProvisioner for AwsProvider {
    async fn resolve_default_network(&self) -> Result<String> {
        let resp = self
            .ec2
            .describe_vpcs()
            .filters(Filter::builder().name("is-default").values("true").build())
            .send()
            .await
            .map_err(|e| sdk("describe_vpcs", ResourceKind::Network, "default", e))?;

        let vpc_id = resp
            .vpcs()
            .iter()
            .find_map(|v| v.vpc_id())
            .ok_or(Error::NoDefaultNetwork)?;

        info!("Default VPC is {}", vpc_id);
        Ok(vpc_id.to_string())
    }

    async fn resolve_subnet(&self, network_id: &str, zone: &str) -> Result<String> {
        let resp = self
            .ec2
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(network_id).build())
            .filters(
                Filter::builder()
                    .name("availability-zone")
                    .values(zone)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk("describe_subnets", ResourceKind::Network, zone, e))?;

        let subnet_id = resp
            .subnets()
            .iter()
            .find_map(|s| s.subnet_id())
            .ok_or_else(|| Error::NoSubnetForZone(zone.to_string()))?;

        info!("Subnet for {} is {}", zone, subnet_id);
        Ok(subnet_id.to_string())
    }

    async fn create_firewall_policy(
        &self,
        network_id: &str,
        policy: &FirewallPolicy,
    ) -> Result<String> {
        let name = policy.name.as_str();

        let group_id = self
            .ec2
            .create_security_group()
            .group_name(name)
            .description(&policy.description)
            .vpc_id(network_id)
            .send()
            .await
            .map_err(|e| sdk("create_security_group", ResourceKind::Firewall, name, e))?
            .group_id()
            .ok_or(Error::MissingDetails("security group id"))?
            .to_string();

        let permissions = policy.rules.iter().map(|rule| {
            IpPermission::builder()
                .ip_protocol(rule.protocol.as_str())
                .from_port(i32::from(rule.port))
                .to_port(i32::from(rule.port))
                .ip_ranges(IpRange::builder().cidr_ip(&rule.source_cidr).build())
                .build()
        });

        self.ec2
            .authorize_security_group_ingress()
            .group_id(&group_id)
            .set_ip_permissions(Some(permissions.collect()))
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "authorize_security_group_ingress",
                    ResourceKind::Firewall,
                    name,
                    e,
                )
            })?;

        info!("Created security group {} ({})", name, group_id);
        Ok(group_id)
    }

    async fn find_firewall_policy(&self, name: &str) -> Result<String> {
        let resp = self
            .ec2
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .send()
            .await
            .map_err(|e| sdk("describe_security_groups", ResourceKind::Firewall, name, e))?;

        resp.security_groups()
            .iter()
            .find_map(|g| g.group_id())
            .map(ToString::to_string)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Firewall,
                name: name.to_string(),
            })
    }

    async fn delete_firewall_policy(&self, firewall_id: &str) -> Result<()> {
        self.ec2
            .delete_security_group()
            .group_id(firewall_id)
            .send()
            .await
            .map_err(|e| sdk("delete_security_group", ResourceKind::Firewall, firewall_id, e))?;

        info!("Deleted security group {}", firewall_id);
        Ok(())
    }
}
