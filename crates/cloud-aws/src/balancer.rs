//! Network load balancer, listener and target group.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::client::Waiters;
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, IpAddressType, LoadBalancerSchemeEnum, LoadBalancerTypeEnum,
    ProtocolEnum, TargetDescription, TargetTypeEnum,
};
use pasture_cloud::{
    BalancerType, Error, LoadBalancerProvisioner, Protocol, ResourceKind, Result, Scheme,
};
use tracing::info;

use crate::AwsProvider;
use crate::error::{build, sdk, waiter};

fn elb_protocol(protocol: Protocol) -> ProtocolEnum {
    match protocol {
        Protocol::Tcp => ProtocolEnum::Tcp,
    }
}

fn elb_scheme(scheme: Scheme) -> LoadBalancerSchemeEnum {
    match scheme {
        Scheme::InternetFacing => LoadBalancerSchemeEnum::InternetFacing,
        Scheme::Internal => LoadBalancerSchemeEnum::Internal,
    }
}

fn elb_type(balancer_type: BalancerType) -> LoadBalancerTypeEnum {
    match balancer_type {
        BalancerType::Network => LoadBalancerTypeEnum::Network,
        BalancerType::Application => LoadBalancerTypeEnum::Application,
    }
}

#[async_trait]
impl LoadBalancerProvisioner for AwsProvider {
    async fn create_target_group(
        &self,
        name: &str,
        protocol: Protocol,
        port: u16,
        network_id: &str,
    ) -> Result<String> {
        let arn = self
            .elb
            .create_target_group()
            .name(name)
            .protocol(elb_protocol(protocol))
            .port(i32::from(port))
            .vpc_id(network_id)
            .target_type(TargetTypeEnum::Instance)
            .send()
            .await
            .map_err(|e| sdk("create_target_group", ResourceKind::TargetGroup, name, e))?
            .target_groups()
            .iter()
            .find_map(|tg| tg.target_group_arn())
            .ok_or(Error::MissingDetails("target group arn"))?
            .to_string();

        info!("Created target group {}", name);
        Ok(arn)
    }

    async fn register_targets(
        &self,
        target_group_id: &str,
        instance_ids: &[String],
        port: u16,
    ) -> Result<()> {
        let targets = instance_ids
            .iter()
            .map(|id| {
                TargetDescription::builder()
                    .id(id)
                    .port(i32::from(port))
                    .build()
                    .map_err(|e| build("register_targets", e))
            })
            .collect::<Result<Vec<_>>>()?;

        self.elb
            .register_targets()
            .target_group_arn(target_group_id)
            .set_targets(Some(targets))
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "register_targets",
                    ResourceKind::TargetGroup,
                    target_group_id,
                    e,
                )
            })?;

        info!("Registered {} targets", instance_ids.len());
        Ok(())
    }

    async fn create_balancer(
        &self,
        name: &str,
        subnet_id: &str,
        scheme: Scheme,
        balancer_type: BalancerType,
    ) -> Result<String> {
        let arn = self
            .elb
            .create_load_balancer()
            .name(name)
            .subnets(subnet_id)
            .scheme(elb_scheme(scheme))
            .r#type(elb_type(balancer_type))
            .ip_address_type(IpAddressType::Ipv4)
            .send()
            .await
            .map_err(|e| sdk("create_load_balancer", ResourceKind::LoadBalancer, name, e))?
            .load_balancers()
            .iter()
            .find_map(|lb| lb.load_balancer_arn())
            .ok_or(Error::MissingDetails("load balancer arn"))?
            .to_string();

        info!(
            "Created {} {} load balancer {}",
            scheme.as_str(),
            balancer_type.as_str(),
            name
        );
        Ok(arn)
    }

    async fn create_listener(
        &self,
        balancer_id: &str,
        protocol: Protocol,
        port: u16,
        target_group_id: &str,
    ) -> Result<String> {
        let forward = Action::builder()
            .r#type(ActionTypeEnum::Forward)
            .target_group_arn(target_group_id)
            .build()
            .map_err(|e| build("create_listener", e))?;

        let arn = self
            .elb
            .create_listener()
            .load_balancer_arn(balancer_id)
            .protocol(elb_protocol(protocol))
            .port(i32::from(port))
            .default_actions(forward)
            .send()
            .await
            .map_err(|e| sdk("create_listener", ResourceKind::Listener, balancer_id, e))?
            .listeners()
            .iter()
            .find_map(|l| l.listener_arn())
            .ok_or(Error::MissingDetails("listener arn"))?
            .to_string();

        info!("Created listener on port {}", port);
        Ok(arn)
    }

    async fn await_available(&self, balancer_id: &str, max_wait: Duration) -> Result<()> {
        info!("Waiting for load balancer to become active");

        self.elb
            .wait_until_load_balancer_available()
            .load_balancer_arns(balancer_id)
            .wait(max_wait)
            .await
            .map_err(|e| waiter("load balancer to become active".to_string(), e))?;

        info!("Load balancer is active");
        Ok(())
    }

    async fn resolve_dns_name(&self, balancer_id: &str) -> Result<String> {
        self.elb
            .describe_load_balancers()
            .load_balancer_arns(balancer_id)
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "describe_load_balancers",
                    ResourceKind::LoadBalancer,
                    balancer_id,
                    e,
                )
            })?
            .load_balancers()
            .iter()
            .find_map(|lb| lb.dns_name())
            .map(ToString::to_string)
            .ok_or(Error::MissingDetails("load balancer DNS name"))
    }

    async fn find_balancer(&self, name: &str) -> Result<String> {
        self.elb
            .describe_load_balancers()
            .names(name)
            .send()
            .await
            .map_err(|e| sdk("describe_load_balancers", ResourceKind::LoadBalancer, name, e))?
            .load_balancers()
            .iter()
            .find_map(|lb| lb.load_balancer_arn())
            .map(ToString::to_string)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::LoadBalancer,
                name: name.to_string(),
            })
    }

    async fn find_target_group(&self, name: &str) -> Result<String> {
        self.elb
            .describe_target_groups()
            .names(name)
            .send()
            .await
            .map_err(|e| sdk("describe_target_groups", ResourceKind::TargetGroup, name, e))?
            .target_groups()
            .iter()
            .find_map(|tg| tg.target_group_arn())
            .map(ToString::to_string)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::TargetGroup,
                name: name.to_string(),
            })
    }

    async fn delete_balancer(&self, balancer_id: &str) -> Result<()> {
        self.elb
            .delete_load_balancer()
            .load_balancer_arn(balancer_id)
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "delete_load_balancer",
                    ResourceKind::LoadBalancer,
                    balancer_id,
                    e,
                )
            })?;

        info!("Deleted load balancer");
        Ok(())
    }

    async fn delete_target_group(&self, target_group_id: &str) -> Result<()> {
        self.elb
            .delete_target_group()
            .target_group_arn(target_group_id)
            .send()
            .await
            .map_err(|e| {
                sdk(
                    "delete_target_group",
                    ResourceKind::TargetGroup,
                    target_group_id,
                    e,
                )
            })?;

        info!("Deleted target group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_mapping() {
        assert_eq!(elb_protocol(Protocol::Tcp), ProtocolEnum::Tcp);
        assert_eq!(
            elb_scheme(Scheme::InternetFacing),
            LoadBalancerSchemeEnum::InternetFacing
        );
        assert_eq!(elb_type(BalancerType::Network), LoadBalancerTypeEnum::Network);
        assert_eq!(elb_scheme(Scheme::default()).as_str(), "internet-facing");
    }
}
