//! Session state for Peerlink.
//!
//! This crate is pure bookkeeping, no sockets:
//!
//! 1. **Role and phase**: whether this peer hosts or joins, and whether it
//!    is idle, in the lobby, or in a running game ([`Session`])
//! 2. **Identity**: the network ID this peer was assigned ([`Identity`])
//! 3. **Players**: the table of connected peers, with tombstones and
//!    one-pass compaction ([`PlayerTable`])
//! 4. **UDP channels**: the small set of addresses the host fans datagrams
//!    out to ([`ChannelTable`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Peerlink facade (above)  ← NetworkManager, receive loops, batching
//!     ↕
//! Session Layer (this crate)  ← who is connected, what state we are in
//!     ↕
//! Protocol Layer (below)  ← provides NetId
//! ```

mod channels;
mod error;
mod players;
mod session;

pub use channels::{ChannelTable, MAX_UDP_CHANNELS};
pub use error::SessionError;
pub use players::{MAX_PLAYERS, PlayerRecord, PlayerTable};
pub use session::{Identity, Phase, Role, Session};
