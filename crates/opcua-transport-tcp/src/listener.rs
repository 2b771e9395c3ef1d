//! Thin wrapper over Tokio's `TcpListener`: bind once, accept repeatedly. Kept
//! separate from [`crate::manager::TcpConnectionManager`] so the accept-loop/bookkeeping
//! logic isn't tangled with the raw bind/accept primitive.

use std::net::SocketAddr;

use tokio::net::TcpListener as TokioTcpListener;

use crate::channel::TcpChannel;

#[derive(Debug)]
pub struct TcpListener {
    inner: TokioTcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let inner = TokioTcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self) -> std::io::Result<(TcpChannel, SocketAddr)> {
        let (stream, peer_addr) = self.inner.accept().await?;
        let local_addr = stream.local_addr()?;
        let channel = TcpChannel::from_parts(stream, local_addr, peer_addr);
        Ok((channel, peer_addr))
    }
}
