//! Transport layer for Peerlink.
//!
//! Every peer owns two kinds of socket:
//!
//! - a TCP link per remote peer ([`TcpTransport`] listens and accepts on the
//!   host, [`TcpConnection::connect`] dials out on a client), carrying
//!   reliable NUL-terminated text messages;
//! - one [`UdpEndpoint`] per process for best-effort datagrams.
//!
//! The [`Transport`] and [`Connection`] traits describe the TCP side so the
//! layers above can talk about "a connection" without caring how it was made.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;
mod udp;

pub use error::TransportError;
pub use tcp::{DEFAULT_MAX_MESSAGE, TcpConnection, TcpTransport};
pub use udp::{DEFAULT_MAX_DATAGRAM, UdpEndpoint};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// The address this transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A single connection that can send and receive whole messages.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one message to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the sending side of the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote peer's address.
    fn peer_addr(&self) -> SocketAddr;
}

/// Resolves `host:port` to the first matching socket address.
///
/// # Errors
/// [`TransportError::Resolve`] if the lookup fails or returns nothing.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let addr = format!("{host}:{port}");
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::Resolve {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| TransportError::Resolve {
        addr,
        reason: "no addresses found".into(),
    })
}
