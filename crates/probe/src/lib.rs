//! Liveness probes for cluster nodes and the load balancer.
//!
//! A probe is a single bounded check that never fails: timeouts, refused
//! connections and DNS errors all mean "not reachable yet". The wait loop on
//! top of it is what callers use while infrastructure comes up.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod transport;

pub use error::{Error, Result};
pub use transport::{HttpTransport, TcpTransport, Transport};

use std::time::Duration;

use pasture_retry::{RetryPolicy, retry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default timeout for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks reachability of `host:port` targets over a [`Transport`].
#[derive(Clone, Debug)]
pub struct Prober<T>
where
    T: Transport,
{
    transport: T,
    timeout: Duration,
}

impl Prober<HttpTransport> {
    /// Creates a prober that issues HTTP GETs, the check used for cache
    /// nodes and the balancer.
    #[must_use]
    pub fn http(timeout: Duration) -> Self {
        Self::new(HttpTransport::new(), timeout)
    }
}

impl<T> Prober<T>
where
    T: Transport,
{
    /// Creates a prober over the given transport.
    pub const fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Timeout applied to each probe made by [`Self::wait_until_reachable`].
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Makes one attempt to reach `address:port` within `timeout`.
    pub async fn probe(&self, address: &str, port: u16, timeout: Duration) -> bool {
        match self.transport.check(address, port, timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("probe of {}:{} failed: {}", address, port, e);
                false
            }
        }
    }

    /// Probes `address:port` until it answers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires and
    /// [`Error::Unreachable`] if `policy` runs out of attempts.
    pub async fn wait_until_reachable(
        &self,
        address: &str,
        port: u16,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = format!("{address}:{port}");
        info!("Waiting for {}", target);

        let outcome = retry(policy, cancel, &format!("probe {target}"), |_| async move {
            if self.probe(address, port, self.timeout).await {
                Ok(())
            } else {
                Err("not reachable")
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!("{} is reachable", target);
                Ok(())
            }
            Err(pasture_retry::Error::Cancelled) => Err(Error::Cancelled(target)),
            Err(pasture_retry::Error::Exhausted { attempts, .. }) => {
                Err(Error::Unreachable { target, attempts })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Transport that refuses a fixed number of times and records when it
    /// was called.
    #[derive(Clone, Debug)]
    struct ScriptedTransport {
        failures: u32,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn check(
            &self,
            _address: &str,
            _port: u16,
            _timeout: Duration,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let mut calls = self.calls.lock();
            calls.push(Instant::now());
            if calls.len() as u32 <= self.failures {
                Err("connection refused".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_retries_at_five_second_intervals() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let prober = Prober::new(
            ScriptedTransport {
                failures: 3,
                calls: calls.clone(),
            },
            DEFAULT_PROBE_TIMEOUT,
        );

        prober
            .wait_until_reachable(
                "h0",
                7070,
                &RetryPolicy::fixed(Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let calls = calls.lock();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_under_bounded_policy() {
        let prober = Prober::new(
            ScriptedTransport {
                failures: u32::MAX,
                calls: Arc::new(Mutex::new(Vec::new())),
            },
            DEFAULT_PROBE_TIMEOUT,
        );
        let policy =
            RetryPolicy::exponential(Duration::from_secs(5), Duration::from_secs(20), 4);

        let err = prober
            .wait_until_reachable("h1", 7070, &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Unreachable { target, attempts } => {
                assert_eq!(target, "h1:7070");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_honours_cancellation() {
        let prober = Prober::new(
            ScriptedTransport {
                failures: u32::MAX,
                calls: Arc::new(Mutex::new(Vec::new())),
            },
            DEFAULT_PROBE_TIMEOUT,
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            canceller.cancel();
        });

        let err = prober
            .wait_until_reachable(
                "h2",
                7070,
                &RetryPolicy::fixed(Duration::from_secs(5)),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(target) if target == "h2:7070"));
    }
}
