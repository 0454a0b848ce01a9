//! TCP transport: a listener for the host and NUL-framed connections.
//!
//! Each message on the wire is the packet text followed by a single NUL
//! byte. The reader splits the byte stream on NUL, so packets that the
//! kernel coalesces or splits still come out one message at a time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Default receive buffer, and therefore the longest message delivered
/// intact. Longer messages are truncated to this length.
pub const DEFAULT_MAX_MESSAGE: usize = 4096;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const TERMINATOR: u8 = 0;

/// A listening TCP socket that produces [`TcpConnection`]s.
pub struct TcpTransport {
    listener: TcpListener,
    max_message: usize,
}

impl TcpTransport {
    /// Binds a listener to the given local address.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(%addr, "TCP transport listening");
        Ok(Self {
            listener,
            max_message: DEFAULT_MAX_MESSAGE,
        })
    }

    /// Sets the receive buffer size for accepted connections.
    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message.max(1);
        self
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = TcpConnection::from_stream(stream, peer, self.max_message);
        tracing::debug!(id = %conn.id, %peer, "accepted TCP connection");
        Ok(conn)
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

/// One TCP link to a remote peer.
///
/// The stream is split so a receive loop blocked in [`recv`](Connection::recv)
/// never holds up a flush calling [`send`](Connection::send). Dropping the
/// last handle closes the socket.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    local: Option<SocketAddr>,
    reader: Mutex<FrameReader>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConnection {
    /// Connects to a remote listener.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::connect_with(addr, DEFAULT_MAX_MESSAGE).await
    }

    /// Connects with a custom receive buffer size.
    pub async fn connect_with(
        addr: SocketAddr,
        max_message: usize,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await.map_err(|source| {
            TransportError::ConnectFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        let conn = Self::from_stream(stream, addr, max_message.max(1));
        tracing::debug!(id = %conn.id, %addr, "TCP connection established");
        Ok(conn)
    }

    /// The local end of the link, if the OS reported it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr, max_message: usize) -> Self {
        // Small game packets should leave immediately, not wait for Nagle.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not disable Nagle");
        }
        let local = stream.local_addr().ok();
        let (read, write) = stream.into_split();
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer,
            local,
            reader: Mutex::new(FrameReader::new(read, max_message)),
            writer: Mutex::new(write),
        }
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.extend_from_slice(data);
        frame.push(TERMINATOR);

        self.writer
            .lock()
            .await
            .write_all(&frame)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        self.reader.lock().await.next_frame().await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Splits the inbound byte stream into NUL-terminated messages.
struct FrameReader {
    half: OwnedReadHalf,
    pending: Vec<u8>,
    buf: Vec<u8>,
    max: usize,
    /// Set after a truncation: bytes up to the next NUL are the tail of
    /// the oversized message and are thrown away.
    discarding: bool,
}

impl FrameReader {
    fn new(half: OwnedReadHalf, max: usize) -> Self {
        Self {
            half,
            pending: Vec::new(),
            buf: vec![0; max],
            max,
            discarding: false,
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.pending.iter().position(|b| *b == TERMINATOR) {
                Some(pos) if self.discarding => {
                    self.discarding = false;
                    self.pending.drain(..=pos);
                    continue;
                }
                // A terminator past `max` means the message is oversized.
                Some(pos) if pos <= self.max => {
                    let mut frame: Vec<u8> = self.pending.drain(..=pos).collect();
                    frame.pop();
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                Some(_) => {}
                None if self.discarding => self.pending.clear(),
                None => {}
            }

            if !self.discarding && self.pending.len() >= self.max {
                let frame: Vec<u8> = self.pending.drain(..self.max).collect();
                self.discarding = true;
                tracing::debug!(max = self.max, "message exceeds receive buffer, truncated");
                return Ok(Some(frame));
            }

            let n = self
                .half
                .read(&mut self.buf)
                .await
                .map_err(TransportError::ReceiveFailed)?;

            if n == 0 {
                // Peer closed. An unterminated final message still counts.
                if self.discarding || self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            self.pending.extend_from_slice(&self.buf[..n]);
        }
    }
}
