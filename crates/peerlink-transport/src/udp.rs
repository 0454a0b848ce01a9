//! Best-effort datagram endpoint.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::TransportError;

/// Default datagram receive buffer. Anything longer is cut off by the kernel.
pub const DEFAULT_MAX_DATAGRAM: usize = 1400;

/// One bound UDP socket, shared between the receive loop and flushes.
///
/// All methods take `&self`, so an endpoint can sit behind an `Arc`.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
    local: SocketAddr,
    max_datagram: usize,
}

impl UdpEndpoint {
    /// Binds a UDP socket to the given local address.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;
        let local = socket
            .local_addr()
            .map_err(|source| TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(%local, "UDP endpoint bound");
        Ok(Self {
            socket,
            local,
            max_datagram: DEFAULT_MAX_DATAGRAM,
        })
    }

    /// Sets the receive buffer size.
    pub fn with_max_datagram(mut self, max_datagram: usize) -> Self {
        self.max_datagram = max_datagram.max(1);
        self
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Sends one datagram to `target`.
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize, TransportError> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(TransportError::SendFailed)
    }

    /// Waits for the next datagram.
    ///
    /// Trailing NUL bytes are trimmed so senders that pad or terminate
    /// their text still decode cleanly.
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0; self.max_datagram];
        let (n, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        buf.truncate(n);
        while buf.last() == Some(&0) {
            buf.pop();
        }
        Ok((buf, from))
    }
}
