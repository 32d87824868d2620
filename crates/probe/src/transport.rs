use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::net::TcpStream;

/// A single reachability check against `address:port`.
#[async_trait]
pub trait Transport
where
    Self: Send + Sync + 'static,
{
    /// Checks the target once, giving up after `timeout`.
    ///
    /// Any error means "not reachable"; callers never propagate it.
    async fn check(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Issues an HTTP GET against `http://address:port/`.
///
/// Any HTTP response counts as reachable, including error statuses: only a
/// network-level failure means the node is not up.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn check(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.client
            .get(format!("http://{address}:{port}/"))
            .timeout(timeout)
            .send()
            .await?;

        Ok(())
    }
}

/// Opens and immediately drops a TCP connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn check(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tokio::time::timeout(timeout, TcpStream::connect((address, port))).await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_PROBE_TIMEOUT, Prober};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = Prober::new(TcpTransport, DEFAULT_PROBE_TIMEOUT);

        assert!(prober.probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused_port() {
        let port = refused_port().await;
        let prober = Prober::new(TcpTransport, DEFAULT_PROBE_TIMEOUT);

        assert!(!prober.probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_http_probe_counts_error_status_as_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let prober = Prober::http(DEFAULT_PROBE_TIMEOUT);

        assert!(prober.probe("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_http_probe_refused_port() {
        let port = refused_port().await;
        let prober = Prober::http(DEFAULT_PROBE_TIMEOUT);

        assert!(!prober.probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }
}
