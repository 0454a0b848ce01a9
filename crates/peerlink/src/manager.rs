//! [`NetworkManager`]: the one object game code talks to.
//!
//! It ties the layers together: session state decides what is allowed,
//! the transports move bytes, the background loops fill the inbound queue,
//! and the per-frame batches are flushed as one packet per transport.

use std::net::SocketAddr;
use std::sync::Arc;

use peerlink_protocol::{Codec, Delivery, Event, NetId, TextCodec};
use peerlink_session::{Phase, Role, Session, SessionError};
use peerlink_transport::{Connection, TcpConnection, TcpTransport, Transport, UdpEndpoint, resolve};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::batch::OutboundBatch;
use crate::bus::{EventBus, LocalBus};
use crate::config::NetConfig;
use crate::handshake::ClientHandshake;
use crate::inbound::InboundQueue;
use crate::loops::{AcceptContext, Link, Shared, accept_loop, tcp_recv_loop, udp_recv_loop};
use crate::PeerlinkError;

/// What one [`flush`](NetworkManager::flush) put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// TCP messages sent, one per recipient.
    pub tcp_packets: usize,
    /// Datagrams sent, one per destination.
    pub udp_packets: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.tcp_packets + self.udp_packets
    }
}

/// What one [`pump`](NetworkManager::pump) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Inbound events published to the bus.
    pub dispatched: usize,
    pub flushed: FlushReport,
}

/// Hosts or joins one session and moves events in both directions.
///
/// ```text
/// new() ──→ host() ──→ start_game() ──→ reset()
///      └──→ join() ──→ start_game_client() ──┘
/// ```
///
/// Per frame, the game calls [`prepare_tcp`](Self::prepare_tcp) /
/// [`prepare_udp`](Self::prepare_udp) as things happen, then
/// [`pump`](Self::pump) once (or [`poll_events`](Self::poll_events) and
/// [`flush`](Self::flush) separately). Nothing here blocks on the network
/// except the sends inside `flush`.
pub struct NetworkManager<B: EventBus = LocalBus> {
    config: NetConfig,
    session: Session,
    bus: Arc<B>,
    codec: TextCodec,
    shared: Arc<Shared>,
    inbound: InboundQueue,
    tcp_batch: OutboundBatch,
    udp_batch: OutboundBatch,
    udp: Option<Arc<UdpEndpoint>>,
    /// Where a client sends its datagrams.
    udp_peer: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    handshake: Option<ClientHandshake>,
    /// Root of the accept loop and every TCP receive loop.
    tcp_token: CancellationToken,
    accept_token: CancellationToken,
    udp_token: CancellationToken,
    tracker: TaskTracker,
}

impl NetworkManager<LocalBus> {
    /// Creates an idle manager with its own [`LocalBus`].
    pub fn new(config: NetConfig) -> Self {
        Self::with_bus(config, Arc::new(LocalBus::new()))
    }
}

impl Default for NetworkManager<LocalBus> {
    fn default() -> Self {
        Self::new(NetConfig::default())
    }
}

impl<B: EventBus> NetworkManager<B> {
    /// Creates an idle manager that publishes inbound events to `bus`.
    pub fn with_bus(config: NetConfig, bus: Arc<B>) -> Self {
        let tcp_token = CancellationToken::new();
        Self {
            shared: Arc::new(Shared::new(config.max_players)),
            config,
            session: Session::new(),
            bus,
            codec: TextCodec,
            inbound: InboundQueue::new(),
            tcp_batch: OutboundBatch::default(),
            udp_batch: OutboundBatch::default(),
            udp: None,
            udp_peer: None,
            local_addr: None,
            handshake: None,
            accept_token: tcp_token.child_token(),
            tcp_token,
            udp_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Sets the host address and port used by the next `host` or `join`.
    pub fn set_target(&mut self, address: impl Into<String>, port: u16) {
        self.config.set_target(address, port);
    }

    /// Opens the lobby as host.
    ///
    /// Binds the TCP listener and the UDP socket, registers the host as
    /// player 0, and starts the accept and UDP receive loops. If either
    /// socket fails, nothing stays open and the session stays idle.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyActive`] if a lobby or game is running
    /// - a [`TransportError`](peerlink_transport::TransportError) if resolving or binding fails
    pub async fn host(&mut self) -> Result<(), PeerlinkError> {
        self.session.ensure_idle()?;

        let bind_addr = resolve(&self.config.bind_address, self.config.port).await?;
        let transport = TcpTransport::bind(bind_addr)
            .await?
            .with_max_message(self.config.max_tcp_message);
        let local = transport.local_addr()?;
        let udp = self.bind_udp().await?;

        self.shared.players.lock().insert(local, None)?;
        self.session.open_lobby(Role::Host, local.port(), None)?;
        self.local_addr = Some(local);

        let udp_local = udp.local_addr();
        self.start_udp(udp);

        let ctx = AcceptContext {
            shared: Arc::clone(&self.shared),
            inbound: self.inbound.sender(),
            tracker: self.tracker.clone(),
            links: self.tcp_token.clone(),
            peer_udp_port: self.config.remote_udp_port(),
        };
        self.tracker
            .spawn(accept_loop(transport, ctx, self.accept_token.clone()));

        tracing::info!(%local, %udp_local, "hosting");
        Ok(())
    }

    /// Joins the host at the configured target.
    ///
    /// The ACCEPT subscription goes in before connecting; the assigned ID
    /// shows up in [`assigned_id`](Self::assigned_id) once the handshake
    /// has been dispatched by [`poll_events`](Self::poll_events).
    ///
    /// # Errors
    /// - [`SessionError::AlreadyActive`] if a lobby or game is running
    /// - a [`TransportError`](peerlink_transport::TransportError) if
    ///   resolving, connecting or binding UDP fails; the handshake
    ///   subscription is removed and nothing stays open
    pub async fn join(&mut self) -> Result<(), PeerlinkError> {
        self.session.ensure_idle()?;
        let target = resolve(&self.config.address, self.config.port).await?;

        let handshake = ClientHandshake::install(&self.bus, self.session.identity());
        match self.open_client(target).await {
            Ok(()) => {
                self.handshake = Some(handshake);
                Ok(())
            }
            Err(e) => {
                handshake.cancel(self.bus.as_ref());
                Err(e)
            }
        }
    }

    async fn open_client(&mut self, target: SocketAddr) -> Result<(), PeerlinkError> {
        let conn = TcpConnection::connect_with(target, self.config.max_tcp_message).await?;
        let udp = self.bind_udp().await?;

        let link = Arc::new(Link {
            conn,
            stop: self.tcp_token.child_token(),
        });
        let local = link.conn.local_addr();
        let host_id = self
            .shared
            .players
            .lock()
            .insert(target, Some(Arc::clone(&link)))?;
        self.session
            .open_lobby(Role::Client, self.config.port, Some(target))?;
        self.local_addr = local;
        self.udp_peer = Some(SocketAddr::new(target.ip(), self.config.remote_udp_port()));

        self.tracker.spawn(tcp_recv_loop(
            host_id,
            link,
            self.inbound.sender(),
            Arc::clone(&self.shared),
            Some(self.tcp_token.clone()),
        ));
        self.start_udp(udp);

        tracing::info!(%target, "joined");
        Ok(())
    }

    async fn bind_udp(&self) -> Result<Arc<UdpEndpoint>, PeerlinkError> {
        let addr = resolve(&self.config.bind_address, self.config.local_udp_port()).await?;
        let udp = UdpEndpoint::bind(addr)
            .await?
            .with_max_datagram(self.config.max_udp_packet);
        Ok(Arc::new(udp))
    }

    fn start_udp(&mut self, udp: Arc<UdpEndpoint>) {
        self.udp = Some(Arc::clone(&udp));
        self.tracker.spawn(udp_recv_loop(
            udp,
            self.inbound.sender(),
            self.udp_token.clone(),
        ));
    }

    /// Host: leaves the lobby and stops accepting connections.
    ///
    /// # Errors
    /// [`SessionError::WrongRole`] on a client, [`SessionError::NotInLobby`]
    /// if the lobby is not open.
    pub fn start_game(&mut self) -> Result<(), PeerlinkError> {
        self.session.start(Role::Host)?;
        self.accept_token.cancel();
        Ok(())
    }

    /// Client: leaves the lobby. No packet is exchanged.
    ///
    /// # Errors
    /// [`SessionError::WrongRole`] on the host, [`SessionError::NotInLobby`]
    /// if the lobby is not open.
    pub fn start_game_client(&mut self) -> Result<(), PeerlinkError> {
        self.session.start(Role::Client)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Closes every TCP socket: the listener and all links. Idempotent.
    pub fn close_client(&mut self) {
        let was_open = self.is_connected();
        self.tcp_token.cancel();
        self.shared.clear();
        if was_open {
            tracing::info!("TCP closed");
        }
    }

    /// Closes the UDP socket. Idempotent.
    pub fn close_udp(&mut self) {
        self.udp_token.cancel();
        self.udp_peer = None;
        if self.udp.take().is_some() {
            tracing::info!("UDP closed");
        }
    }

    /// Host: disconnects one player and drops its record immediately.
    ///
    /// # Errors
    /// [`SessionError::WrongRole`] on a client, [`SessionError::UnknownPlayer`]
    /// for the host's own ID or an ID not in the table.
    pub fn kick(&mut self, id: NetId) -> Result<(), PeerlinkError> {
        if !self.session.is_host() {
            return Err(SessionError::WrongRole {
                expected: Role::Host,
                actual: self.session.role(),
            }
            .into());
        }
        if id.is_host() {
            return Err(SessionError::UnknownPlayer(id).into());
        }

        let record = self
            .shared
            .players
            .lock()
            .remove(id)
            .ok_or(SessionError::UnknownPlayer(id))?;
        self.shared.channels.lock().release(id);
        if let Some(link) = &record.conn {
            link.stop.cancel();
        }

        tracing::info!(net_id = %id, addr = %record.addr, "player kicked");
        Ok(())
    }

    /// Marks a player as gone. The record is compacted away on the next
    /// flush or accept. Returns `false` for an unknown or already removed ID.
    pub fn remove_player(&mut self, id: NetId) -> bool {
        self.shared.players.lock().tombstone(id)
    }

    /// Closes everything, waits for every background loop to exit, and
    /// returns to a fresh idle session so `host` or `join` can run again.
    pub async fn reset(&mut self) {
        self.tcp_token.cancel();
        self.udp_token.cancel();
        if let Some(handshake) = self.handshake.take() {
            handshake.cancel(self.bus.as_ref());
        }

        self.tracker.close();
        self.tracker.wait().await;

        self.shared.clear();
        self.udp = None;
        self.udp_peer = None;
        self.local_addr = None;
        self.tcp_batch.clear();
        self.udp_batch.clear();
        let stale = self.inbound.drain().len();
        self.session.reset();

        self.tcp_token = CancellationToken::new();
        self.accept_token = self.tcp_token.child_token();
        self.udp_token = CancellationToken::new();
        self.tracker = TaskTracker::new();

        tracing::info!(discarded = stale, "network reset");
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Queues an event for the next TCP flush.
    ///
    /// # Errors
    /// [`ProtocolError`](peerlink_protocol::ProtocolError) if the event
    /// contains framing characters; nothing is queued.
    pub fn prepare_tcp(&mut self, event: Event) -> Result<(), PeerlinkError> {
        self.tcp_batch.push(event)?;
        Ok(())
    }

    /// Queues an event for the next UDP flush.
    ///
    /// # Errors
    /// Same as [`prepare_tcp`](Self::prepare_tcp).
    pub fn prepare_udp(&mut self, event: Event) -> Result<(), PeerlinkError> {
        self.udp_batch.push(event)?;
        Ok(())
    }

    /// Queues an event on the transport matching `delivery`.
    pub fn prepare(&mut self, delivery: Delivery, event: Event) -> Result<(), PeerlinkError> {
        match delivery {
            Delivery::Reliable => self.prepare_tcp(event),
            Delivery::Unreliable => self.prepare_udp(event),
        }
    }

    /// Events waiting for the next TCP flush.
    pub fn pending_tcp(&self) -> usize {
        self.tcp_batch.len()
    }

    /// Events waiting for the next UDP flush.
    pub fn pending_udp(&self) -> usize {
        self.udp_batch.len()
    }

    /// Sends each pending batch as one packet and clears it.
    ///
    /// TCP: to every live peer except ourselves. A failed send tombstones
    /// that peer. UDP: on the host, to every bound channel plus every live
    /// player without one; on a client, to the host. An empty batch sends
    /// nothing.
    pub async fn flush(&mut self) -> FlushReport {
        FlushReport {
            tcp_packets: self.flush_tcp().await,
            udp_packets: self.flush_udp().await,
        }
    }

    /// Same as [`flush`](Self::flush).
    pub async fn send_queued_events(&mut self) -> FlushReport {
        self.flush().await
    }

    async fn flush_tcp(&mut self) -> usize {
        let Some(packet) = self.tcp_batch.take_packet(&self.codec) else {
            return 0;
        };

        self.shared.compact();
        let self_id = self.session.identity().get();
        let recipients = self.shared.players.lock().recipients(self_id);

        let mut sent = 0;
        for (id, link) in recipients {
            match link.conn.send(&packet).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(net_id = %id, error = %e, "TCP send failed");
                    self.shared.players.lock().tombstone(id);
                }
            }
        }
        tracing::trace!(sent, len = packet.len(), "TCP batch flushed");
        sent
    }

    async fn flush_udp(&mut self) -> usize {
        let Some(packet) = self.udp_batch.take_packet(&self.codec) else {
            return 0;
        };
        let Some(udp) = self.udp.clone() else {
            tracing::debug!("UDP closed, batch dropped");
            return 0;
        };

        let targets = if self.session.is_host() {
            self.shared
                .udp_targets(self.assigned_id(), self.config.remote_udp_port())
        } else {
            self.udp_peer.into_iter().collect()
        };

        let mut sent = 0;
        for target in targets {
            match udp.send_to(&packet, target).await {
                Ok(_) => sent += 1,
                Err(e) => tracing::debug!(%target, error = %e, "UDP send failed"),
            }
        }
        tracing::trace!(sent, len = packet.len(), "UDP batch flushed");
        sent
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Pops one raw inbound message, or `None` if none is waiting.
    pub fn poll_message(&mut self) -> Option<String> {
        self.inbound.pop()
    }

    /// Decodes one packet and publishes each event under `<netID>|<key>`.
    ///
    /// Returns how many events were published. Malformed records (or a
    /// packet with no envelope) are dropped.
    pub fn dispatch(&self, packet: &str) -> usize {
        let events = match self.codec.decode(packet.as_bytes()) {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(error = %e, "dropping packet");
                return 0;
            }
        };
        for event in &events {
            self.bus.publish(&event.topic(), event);
        }
        events.len()
    }

    /// Drains the inbound queue and dispatches every message.
    pub fn poll_events(&mut self) -> usize {
        let mut dispatched = 0;
        while let Some(message) = self.inbound.pop() {
            dispatched += self.dispatch(&message);
        }
        dispatched
    }

    /// One frame of network work: dispatch everything received, then flush.
    pub async fn pump(&mut self) -> PumpReport {
        let dispatched = self.poll_events();
        let flushed = self.flush().await;
        PumpReport {
            dispatched,
            flushed,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// `true` while the TCP side is open: the listener on a host, the link
    /// to the host on a client.
    pub fn is_connected(&self) -> bool {
        self.session.phase() != Phase::Idle && !self.tcp_token.is_cancelled()
    }

    pub fn is_host(&self) -> bool {
        self.session.is_host()
    }

    /// Whether `id` is this peer's own ID.
    pub fn is_self(&self, id: NetId) -> bool {
        self.assigned_id() == Some(id)
    }

    /// This peer's ID: always 0 on the host, set by the handshake on a client.
    pub fn assigned_id(&self) -> Option<NetId> {
        self.session.identity().get()
    }

    /// Watches the assigned ID, to wait for the handshake.
    pub fn handshake_watch(&self) -> watch::Receiver<Option<NetId>> {
        self.session.identity().subscribe()
    }

    pub fn role(&self) -> Option<Role> {
        self.session.role()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    /// The host's listening address, or the client's end of its link.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The address the UDP socket is bound to, while open.
    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().map(|udp| udp.local_addr())
    }

    /// Live player records, the host's own included.
    pub fn player_count(&self) -> usize {
        self.shared.players.lock().live_count()
    }

    /// IDs of the live player records, ascending.
    pub fn player_ids(&self) -> Vec<NetId> {
        self.shared.players.lock().live_ids()
    }

    /// UDP destinations currently bound on the host.
    pub fn udp_channels(&self) -> Vec<SocketAddr> {
        self.shared.channels.lock().addrs()
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }
}

impl<B: EventBus> Drop for NetworkManager<B> {
    fn drop(&mut self) {
        self.tcp_token.cancel();
        self.udp_token.cancel();
        if let Some(handshake) = &self.handshake {
            handshake.cancel(self.bus.as_ref());
        }
    }
}
