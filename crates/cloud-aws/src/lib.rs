//! AWS backend for the provisioner traits.
//!
//! Networking, firewall and compute go through EC2; the balancer, its
//! listener and target group through Elastic Load Balancing v2. Long waits
//! use the SDK's own waiters.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod balancer;
mod compute;
mod error;
mod network;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::config::Credentials;
use tracing::info;

/// Provisions cluster resources in one AWS region.
#[derive(Clone, Debug)]
pub struct AwsProvider {
    ec2: aws_sdk_ec2::Client,
    elb: aws_sdk_elasticloadbalancingv2::Client,
}

impl AwsProvider {
    /// Creates a provider using the default credential chain.
    pub async fn new(region: String) -> Self {
        info!("Using default AWS credentials in {}", region);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;

        Self::from_config(&config)
    }

    /// Creates a provider authenticating with a fixed access key pair.
    pub async fn with_static_keys(
        region: String,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Self {
        info!("Using static AWS credentials in {}", region);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "pasture",
            ))
            .load()
            .await;

        Self::from_config(&config)
    }

    fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self {
            ec2: aws_sdk_ec2::Client::new(config),
            elb: aws_sdk_elasticloadbalancingv2::Client::new(config),
        }
    }
}
