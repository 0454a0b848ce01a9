//! Error types for the session layer.

use peerlink_protocol::NetId;

use crate::{Phase, Role};

/// Errors that can occur while changing session state or the player table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `host` or `join` was called while a lobby or game is already active.
    #[error("session already active ({0})")]
    AlreadyActive(Phase),

    /// A role-specific operation was called on the other role, or before
    /// any role was chosen.
    #[error("operation requires role {expected}, session is {actual:?}")]
    WrongRole {
        /// The role the operation needs.
        expected: Role,
        /// The role the session actually has.
        actual: Option<Role>,
    },

    /// The operation is only valid in the lobby.
    #[error("not in lobby (phase is {0})")]
    NotInLobby(Phase),

    /// The player table already holds its maximum number of live records.
    #[error("capacity exceeded: {0} players already connected")]
    CapacityExceeded(usize),

    /// No record exists for the given player.
    #[error("unknown player {0}")]
    UnknownPlayer(NetId),
}
