//! The ACCEPT handshake.
//!
//! On accept the host sends `[{key:ACCEPT,netID:0,myNetID:<id>}]` over the
//! new link. A joining client subscribes to `0|ACCEPT` *before* it
//! connects, so the reply is caught no matter how fast it arrives, records
//! the ID, and drops its subscription.

use std::sync::{Arc, OnceLock};

use peerlink_protocol::{Event, NetId};
use peerlink_session::Identity;

use crate::bus::{EventBus, SubscriptionId};

/// Event key of the handshake.
pub const ACCEPT_KEY: &str = "ACCEPT";
/// Bus topic the handshake arrives on.
pub const ACCEPT_TOPIC: &str = "0|ACCEPT";
/// Field carrying the assigned ID.
pub const MY_NET_ID_FIELD: &str = "myNetID";

/// Builds the handshake event telling a new player its ID.
pub fn accept_event(assigned: NetId) -> Event {
    Event::new(NetId::HOST, ACCEPT_KEY).with(MY_NET_ID_FIELD, assigned.0)
}

/// A pending client-side handshake subscription.
#[derive(Debug)]
pub(crate) struct ClientHandshake {
    subscription: SubscriptionId,
}

impl ClientHandshake {
    /// Subscribes to the ACCEPT topic. The first valid ACCEPT assigns
    /// `identity` and removes the subscription.
    pub(crate) fn install<B: EventBus>(bus: &Arc<B>, identity: &Identity) -> Self {
        let slot: Arc<OnceLock<SubscriptionId>> = Arc::default();

        let weak_bus = Arc::downgrade(bus);
        let own_slot = Arc::clone(&slot);
        let identity = identity.clone();

        let subscription = bus.subscribe(
            ACCEPT_TOPIC,
            Arc::new(move |event: &Event| {
                let Some(id) = parse_assigned(event) else {
                    tracing::debug!(?event, "ACCEPT without a usable myNetID");
                    return;
                };
                identity.assign(id);
                tracing::info!(net_id = %id, "handshake complete");

                if let (Some(bus), Some(sub)) = (weak_bus.upgrade(), own_slot.get()) {
                    bus.unsubscribe(*sub);
                }
            }),
        );
        let _ = slot.set(subscription);

        Self { subscription }
    }

    /// Removes the subscription if it is still registered.
    pub(crate) fn cancel<B: EventBus>(&self, bus: &B) {
        if bus.unsubscribe(self.subscription) {
            tracing::debug!("handshake subscription cancelled");
        }
    }
}

fn parse_assigned(event: &Event) -> Option<NetId> {
    let raw = event.get(MY_NET_ID_FIELD)?.as_i64()?;
    u32::try_from(raw).ok().map(NetId)
}
