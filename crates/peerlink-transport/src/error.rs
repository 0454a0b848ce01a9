/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The address could not be resolved to a socket address.
    #[error("could not resolve {addr}: {reason}")]
    Resolve {
        /// The `host:port` that was looked up.
        addr: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Opening a listening TCP socket or a UDP socket failed.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        /// The local address we tried to bind.
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the remote host failed (refused, unreachable, ...).
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        /// The remote address.
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}
