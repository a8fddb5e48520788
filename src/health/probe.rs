// src/health/probe.rs
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
}

/// Opens, and immediately closes, one connection to a `host:port`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, authority: &str) -> std::io::Result<()>;
}

/// Plain TCP connect, DNS resolution included.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, authority: &str) -> std::io::Result<()> {
        let stream = TcpStream::connect(authority).await?;
        drop(stream);
        Ok(())
    }
}

/// Open a TCP connection to `authority` (`host:port`) and close it right away.
///
/// Exactly one attempt is made; the whole connect, DNS included, is bounded by
/// `limit`.
pub async fn probe_tcp(authority: &str, limit: Duration) -> Result<(), ProbeError> {
    probe_with(&TcpConnector, authority, limit).await
}

/// [`probe_tcp`] over any [`Connector`].
pub async fn probe_with(
    connector: &dyn Connector,
    authority: &str,
    limit: Duration,
) -> Result<(), ProbeError> {
    match timeout(limit, connector.connect(authority)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ProbeError::Connect {
            addr: authority.to_string(),
            source,
        }),
        Err(_) => Err(ProbeError::Timeout {
            addr: authority.to_string(),
            timeout: limit,
        }),
    }
}
