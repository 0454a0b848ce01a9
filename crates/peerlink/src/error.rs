//! Unified error type for Peerlink.

use peerlink_protocol::ProtocolError;
use peerlink_session::SessionError;
use peerlink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum PeerlinkError {
    /// Resolving, binding, connecting, sending or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An event could not be framed, or a packet could not be read.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The call does not fit the current role or phase.
    #[error(transparent)]
    Session(#[from] SessionError),
}
