//! A thin handle over an accepted or dialed TCP stream. Reading/writing the OPC UA
//! binary protocol on the channel is explicitly out of scope for this subsystem (the
//! encoder/decoder is an external collaborator); `TcpChannel` exists only so the
//! connection-manager layer has something concrete to hand back addressing
//! information for, and something to close.

use std::net::SocketAddr;

use socket2::SockRef;
use tokio::net::TcpStream;

/// One open TCP connection. Holds the stream so it stays open for as long as the
/// channel is alive; dropping the channel (or calling [`TcpChannel::shutdown`]) closes
/// the socket.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpChannel {
    pub(crate) fn from_parts(stream: TcpStream, local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self { stream, local_addr, peer_addr }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sets `SO_LINGER`, matching the kernel-level close behavior the rest of the
    /// stack expects when a reverse-connect teardown needs a bounded close instead of
    /// waiting indefinitely for the peer's FIN.
    pub fn set_linger(&self, linger: Option<std::time::Duration>) -> std::io::Result<()> {
        SockRef::from(&self.stream).set_linger(linger)
    }

    /// Half- or fully closes the underlying socket immediately.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown().await
    }
}
