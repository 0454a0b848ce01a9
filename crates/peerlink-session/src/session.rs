//! Session types: which role this peer plays and where it is in its lifecycle.
//!
//! A session tracks:
//! - WHAT role this peer has (host or client), fixed once sockets open
//! - WHERE it is in the lifecycle (idle, lobby, started)
//! - WHO it is on the network (the assigned [`NetId`])
//! - WHERE it talks to (local port, and the host's address on a client)

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use peerlink_protocol::NetId;
use tokio::sync::watch;

use crate::SessionError;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of the connection this peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Listens for connections and owns the player table. Always ID 0.
    Host,
    /// Connects to a host and learns its ID from the handshake.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Client => f.write_str("client"),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a session.
///
/// ```text
///   Idle ──(host/join)──→ Lobby ──(start)──→ Started
///    ↑                                          │
///    └──────────────────(reset)─────────────────┘
/// ```
///
/// "In lobby" and "started" can never both be true: they are one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// No sockets are open.
    #[default]
    Idle,
    /// Players may connect, the game has not started.
    Lobby,
    /// The game is running. The host no longer accepts connections.
    Started,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Lobby => f.write_str("lobby"),
            Self::Started => f.write_str("started"),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The network ID assigned to this peer, observable from other tasks.
///
/// The handshake handler writes it from a receive loop while the game loop
/// reads it, so it is a watch channel rather than a plain field. Clones
/// share the same value.
#[derive(Debug, Clone)]
pub struct Identity {
    tx: Arc<watch::Sender<Option<NetId>>>,
}

impl Identity {
    /// Creates an identity with no ID assigned.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Records the assigned ID and wakes every subscriber.
    pub fn assign(&self, id: NetId) {
        self.tx.send_replace(Some(id));
    }

    /// Forgets the assigned ID.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// The assigned ID, if the handshake has completed (or we are the host).
    pub fn get(&self) -> Option<NetId> {
        *self.tx.borrow()
    }

    /// A receiver that observes every future assignment.
    pub fn subscribe(&self) -> watch::Receiver<Option<NetId>> {
        self.tx.subscribe()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// This peer's session state.
///
/// Pure state machine: opening and closing sockets is the caller's job.
/// The caller checks [`ensure_idle`](Self::ensure_idle) before touching the
/// network and calls [`open_lobby`](Self::open_lobby) once every socket is
/// up, so a failed setup leaves the session untouched.
#[derive(Debug, Default)]
pub struct Session {
    role: Option<Role>,
    phase: Phase,
    identity: Identity,
    local_port: Option<u16>,
    target: Option<SocketAddr>,
}

impl Session {
    /// Creates an idle session with no role.
    pub fn new() -> Self {
        Self::default()
    }

    /// The role chosen by `host` or `join`, if any.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_host(&self) -> bool {
        self.role == Some(Role::Host)
    }

    pub fn in_lobby(&self) -> bool {
        self.phase == Phase::Lobby
    }

    pub fn is_started(&self) -> bool {
        self.phase == Phase::Started
    }

    /// The shared identity cell.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The local TCP port this session opened.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// The host's address, on a client.
    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    /// Fails with [`SessionError::AlreadyActive`] unless the session is idle.
    pub fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Idle => Ok(()),
            phase => Err(SessionError::AlreadyActive(phase)),
        }
    }

    /// Enters the lobby with the given role.
    ///
    /// A host is assigned [`NetId::HOST`] immediately. A client's ID stays
    /// unset until the handshake arrives.
    ///
    /// # Errors
    /// [`SessionError::AlreadyActive`] if the session is not idle.
    pub fn open_lobby(
        &mut self,
        role: Role,
        local_port: u16,
        target: Option<SocketAddr>,
    ) -> Result<(), SessionError> {
        self.ensure_idle()?;

        self.role = Some(role);
        self.phase = Phase::Lobby;
        self.local_port = Some(local_port);
        self.target = target;
        if role == Role::Host {
            self.identity.assign(NetId::HOST);
        }

        tracing::info!(%role, local_port, "session entered lobby");
        Ok(())
    }

    /// Moves from the lobby into a running game.
    ///
    /// # Errors
    /// - [`SessionError::WrongRole`] if `role` is not this session's role
    /// - [`SessionError::NotInLobby`] if the session is idle or already started
    pub fn start(&mut self, role: Role) -> Result<(), SessionError> {
        if self.role != Some(role) {
            return Err(SessionError::WrongRole {
                expected: role,
                actual: self.role,
            });
        }
        if self.phase != Phase::Lobby {
            return Err(SessionError::NotInLobby(self.phase));
        }

        self.phase = Phase::Started;
        tracing::info!(%role, "game started");
        Ok(())
    }

    /// Returns to a fresh idle session.
    ///
    /// The identity cell is kept (and cleared) so existing subscribers see
    /// the reset.
    pub fn reset(&mut self) {
        self.role = None;
        self.phase = Phase::Idle;
        self.local_port = None;
        self.target = None;
        self.identity.clear();
    }
}
