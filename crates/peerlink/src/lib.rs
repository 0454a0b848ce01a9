//! # Peerlink
//!
//! Peer-to-peer game networking: one process hosts a session over TCP and
//! UDP, the others join it.
//!
//! Game code owns a [`NetworkManager`], queues events during a frame, and
//! calls [`pump`](NetworkManager::pump) once per tick. Inbound events come
//! out on an [`EventBus`] under `"<netID>|<key>"` topics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peerlink::prelude::*;
//!
//! # async fn run() -> Result<(), PeerlinkError> {
//! let mut net = NetworkManager::new(NetConfig::default().with_target("127.0.0.1", 9999));
//! net.host().await?;
//!
//! net.bus().subscribe("1|Move", std::sync::Arc::new(|ev: &Event| {
//!     println!("player 1 moved to {:?}", ev.get("x"));
//! }));
//!
//! let mut ticks = TickScheduler::with_rate(30);
//! loop {
//!     ticks.wait_for_tick().await;
//!     net.prepare_udp(Event::new(NetId::HOST, "Move").with("x", 1.5))?;
//!     net.pump().await;
//! }
//! # }
//! ```

mod batch;
mod bus;
mod config;
mod error;
mod handshake;
mod inbound;
mod loops;
mod manager;

pub use bus::{EventBus, Handler, LocalBus, SubscriptionId};
pub use config::NetConfig;
pub use error::PeerlinkError;
pub use handshake::{ACCEPT_KEY, ACCEPT_TOPIC, MY_NET_ID_FIELD, accept_event};
pub use manager::{FlushReport, NetworkManager, PumpReport};

pub use peerlink_protocol as protocol;
pub use peerlink_session as session;
pub use peerlink_tick as tick;
pub use peerlink_transport as transport;

/// Everything a game needs in one import.
pub mod prelude {
    pub use crate::{
        EventBus, FlushReport, Handler, LocalBus, NetConfig, NetworkManager, PeerlinkError,
        PumpReport, SubscriptionId,
    };
    pub use peerlink_protocol::{Delivery, Event, NetId, Value};
    pub use peerlink_session::{Phase, Role};
    pub use peerlink_tick::{TickConfig, TickScheduler};
}
