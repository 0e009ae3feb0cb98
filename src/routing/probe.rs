/// Lightweight node status probing
use crate::error::{PasarelaError, PasarelaResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Probe seam for the periodic health check; one call per node address
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, address: &str) -> PasarelaResult<()>;
}

/// TCP connect probe with a fixed per-call timeout.
///
/// A successful connect is enough to count the node as reachable; the
/// status RPC itself belongs to the transport layer.
pub struct TcpStatusProbe {
    probe_timeout: Duration,
}

impl TcpStatusProbe {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

#[async_trait]
impl StatusProbe for TcpStatusProbe {
    async fn probe(&self, address: &str) -> PasarelaResult<()> {
        let addr: std::net::SocketAddr = address.parse()?;
        match timeout(self.probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(PasarelaError::Network(e)),
            Err(_) => Err(PasarelaError::ProbeTimeout {
                address: address.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpStatusProbe::new(Duration::from_secs(1));
        assert!(probe.probe(&addr.to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_unreachable_port() {
        let probe = TcpStatusProbe::new(Duration::from_millis(500));
        let result = probe.probe("127.0.0.1:65534").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn test_probe_bad_address() {
        let probe = TcpStatusProbe::new(Duration::from_millis(500));
        assert!(matches!(
            probe.probe("not-an-address").await,
            Err(PasarelaError::AddressParse(_))
        ));
    }
}
