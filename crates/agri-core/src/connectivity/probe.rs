//! Reachability probes

use async_trait::async_trait;
use std::io;
use tokio::net::TcpStream;

/// A single reachability check. Timeouts are enforced by the caller.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> io::Result<()>;
}

/// Opens a TCP connection to a well-known host
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    /// `addr` is `host:port`, e.g. a public DNS resolver on port 53
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> io::Result<()> {
        TcpStream::connect(&self.addr).await.map(drop)
    }
}
