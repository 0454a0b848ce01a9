//! UDP channel slots: the addresses the host sends each datagram batch to.

use std::net::SocketAddr;

use peerlink_protocol::NetId;

/// Number of individually addressable UDP destinations on the host.
pub const MAX_UDP_CHANNELS: usize = 4;

/// Fixed set of UDP destination slots, keyed by player.
///
/// Players that connect while every slot is taken hold no slot. The host
/// still reaches them through its broadcast to every live player.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    slots: [Option<(NetId, SocketAddr)>; MAX_UDP_CHANNELS],
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `addr` for player `id` and returns the slot index.
    ///
    /// Rebinding a player updates its address in place. Returns `None`
    /// when every slot is held by another player.
    pub fn bind(&mut self, id: NetId, addr: SocketAddr) -> Option<usize> {
        if let Some(slot) = self.slot_of(id) {
            self.slots[slot] = Some((id, addr));
            return Some(slot);
        }

        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some((id, addr));
        tracing::debug!(net_id = %id, %addr, slot, "UDP channel bound");
        Some(slot)
    }

    /// Frees the slot held by `id`, if any.
    pub fn release(&mut self, id: NetId) -> Option<usize> {
        let slot = self.slot_of(id)?;
        self.slots[slot] = None;
        tracing::debug!(net_id = %id, slot, "UDP channel released");
        Some(slot)
    }

    /// Whether `id` holds a slot.
    pub fn is_bound(&self, id: NetId) -> bool {
        self.slot_of(id).is_some()
    }

    fn slot_of(&self, id: NetId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some((bound, _)) if *bound == id))
    }

    /// Every bound destination, in slot order.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.slots.iter().flatten().map(|(_, addr)| *addr).collect()
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}
