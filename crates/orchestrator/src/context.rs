//! Everything an orchestrator operation runs against.

use pasture_cloud::CloudProvider;
use pasture_probe::{Prober, Transport};
use pasture_remote::{Connector, ScaleOutAssets};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Configuration, backends and the cancellation token for one invocation.
///
/// Replaces process-wide settings: everything an operation reads comes
/// from here.
#[derive(Debug)]
pub struct RuntimeContext<P, C, T>
where
    P: CloudProvider,
    C: Connector,
    T: Transport,
{
    pub(crate) config: Config,
    pub(crate) provider: P,
    pub(crate) connector: C,
    pub(crate) prober: Prober<T>,
    pub(crate) cancel: CancellationToken,
    pub(crate) scale_out: Option<ScaleOutAssets>,
}

impl<P, C, T> RuntimeContext<P, C, T>
where
    P: CloudProvider,
    C: Connector,
    T: Transport,
{
    /// Creates a context.
    pub const fn new(
        config: Config,
        provider: P,
        connector: C,
        prober: Prober<T>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            provider,
            connector,
            prober,
            cancel,
            scale_out: None,
        }
    }

    /// Uses `assets` for scalable bootstraps instead of reading them from
    /// the configured paths.
    #[must_use]
    pub fn with_scale_out(mut self, assets: ScaleOutAssets) -> Self {
        self.scale_out = Some(assets);
        self
    }

    /// The configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The cloud backend.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// The token every wait observes.
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
