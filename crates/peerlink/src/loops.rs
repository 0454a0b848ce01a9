//! Background tasks: the host's accept loop and the receive loops.
//!
//! Every loop owns a [`CancellationToken`] and checks it on every
//! iteration through `select!`, so closing a transport is one `cancel()`
//! and the socket is dropped by the task that was using it.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use peerlink_protocol::{NetId, encode_packet};
use peerlink_session::{ChannelTable, PlayerTable};
use peerlink_transport::{Connection, TcpConnection, TcpTransport, Transport, UdpEndpoint};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::handshake::accept_event;
use crate::inbound::InboundSender;

/// A TCP link plus the token that stops its receive loop.
pub(crate) struct Link {
    pub(crate) conn: TcpConnection,
    pub(crate) stop: CancellationToken,
}

/// State touched from both the game loop and background tasks.
///
/// Lock order: `players` before `channels`. Neither lock is ever held
/// across an `.await`.
pub(crate) struct Shared {
    pub(crate) players: Mutex<PlayerTable<Link>>,
    pub(crate) channels: Mutex<ChannelTable>,
}

impl Shared {
    pub(crate) fn new(max_players: usize) -> Self {
        Self {
            players: Mutex::new(PlayerTable::new(max_players)),
            channels: Mutex::new(ChannelTable::new()),
        }
    }

    /// Drops every tombstoned record, frees its UDP channel and stops its
    /// receive loop. Returns the IDs removed.
    pub(crate) fn compact(&self) -> Vec<NetId> {
        let removed = self.players.lock().compact();
        if removed.is_empty() {
            return Vec::new();
        }

        let mut channels = self.channels.lock();
        removed
            .into_iter()
            .map(|record| {
                channels.release(record.id);
                if let Some(link) = &record.conn {
                    link.stop.cancel();
                }
                tracing::debug!(net_id = %record.id, "player record compacted");
                record.id
            })
            .collect()
    }

    /// Where the host sends a UDP batch: every bound channel, then every
    /// other live player that holds no slot, at `peer_udp_port`. One
    /// destination per player.
    pub(crate) fn udp_targets(&self, self_id: Option<NetId>, peer_udp_port: u16) -> Vec<SocketAddr> {
        let peers = self.players.lock().live_peers(self_id);
        let channels = self.channels.lock();

        let mut targets = channels.addrs();
        targets.extend(
            peers
                .into_iter()
                .filter(|(id, _)| !channels.is_bound(*id))
                .map(|(_, addr)| SocketAddr::new(addr.ip(), peer_udp_port)),
        );
        targets
    }

    /// Removes every record and channel, stopping all receive loops.
    pub(crate) fn clear(&self) {
        for record in self.players.lock().clear() {
            if let Some(link) = &record.conn {
                link.stop.cancel();
            }
        }
        self.channels.lock().clear();
    }
}

/// Everything the accept loop needs to admit a player.
pub(crate) struct AcceptContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) inbound: InboundSender,
    pub(crate) tracker: TaskTracker,
    /// Parent of every per-link token.
    pub(crate) links: CancellationToken,
    pub(crate) peer_udp_port: u16,
}

/// Host only: admits connections until cancelled.
pub(crate) async fn accept_loop(
    mut transport: TcpTransport,
    ctx: AcceptContext,
    token: CancellationToken,
) {
    tracing::debug!("accept loop started");

    loop {
        let conn = tokio::select! {
            _ = token.cancelled() => break,
            accepted = transport.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::debug!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        admit(conn, &ctx, &token).await;
    }

    tracing::debug!("accept loop stopped");
}

async fn admit(conn: TcpConnection, ctx: &AcceptContext, token: &CancellationToken) {
    let peer = conn.peer_addr();
    ctx.shared.compact();

    let link = Arc::new(Link {
        conn,
        stop: ctx.links.child_token(),
    });

    let inserted = ctx.shared.players.lock().insert(peer, Some(Arc::clone(&link)));
    let id = match inserted {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "connection rejected");
            if let Err(e) = link.conn.close().await {
                tracing::debug!(%peer, error = %e, "close after rejection failed");
            }
            return;
        }
    };

    let udp_target = SocketAddr::new(peer.ip(), ctx.peer_udp_port);
    if ctx.shared.channels.lock().bind(id, udp_target).is_none() {
        tracing::debug!(net_id = %id, "no free UDP channel, player gets broadcast only");
    }

    ctx.tracker.spawn(tcp_recv_loop(
        id,
        Arc::clone(&link),
        ctx.inbound.clone(),
        Arc::clone(&ctx.shared),
        None,
    ));

    tracing::info!(net_id = %id, %peer, "player connected");

    let packet = match encode_packet(&[accept_event(id)]) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::debug!(error = %e, "could not frame handshake");
            ctx.shared.players.lock().tombstone(id);
            return;
        }
    };

    let sent = tokio::select! {
        _ = token.cancelled() => {
            tracing::debug!(net_id = %id, "lobby closed before handshake was sent");
            ctx.shared.players.lock().tombstone(id);
            return;
        }
        sent = link.conn.send(packet.as_bytes()) => sent,
    };
    if let Err(e) = sent {
        tracing::debug!(net_id = %id, error = %e, "handshake send failed");
        ctx.shared.players.lock().tombstone(id);
    }
}

/// Reads one TCP link into the inbound queue until it fails or is stopped.
///
/// When the link fails its record is tombstoned. On a client,
/// `close_on_loss` is the TCP root token, so losing the host closes the
/// whole TCP side.
pub(crate) async fn tcp_recv_loop(
    id: NetId,
    link: Arc<Link>,
    inbound: InboundSender,
    shared: Arc<Shared>,
    close_on_loss: Option<CancellationToken>,
) {
    loop {
        let received = tokio::select! {
            _ = link.stop.cancelled() => break,
            received = link.conn.recv() => received,
        };

        match received {
            Ok(Some(bytes)) => {
                tracing::trace!(net_id = %id, len = bytes.len(), "TCP message received");
                inbound.push(String::from_utf8_lossy(&bytes).into_owned());
            }
            outcome => {
                match outcome {
                    Err(e) => tracing::debug!(net_id = %id, error = %e, "TCP receive failed"),
                    _ => tracing::info!(net_id = %id, "peer closed the connection"),
                }
                shared.players.lock().tombstone(id);
                if let Some(token) = &close_on_loss {
                    token.cancel();
                }
                break;
            }
        }
    }

    tracing::debug!(net_id = %id, "TCP receive loop stopped");
}

/// Reads the UDP socket into the inbound queue until cancelled.
pub(crate) async fn udp_recv_loop(
    udp: Arc<UdpEndpoint>,
    inbound: InboundSender,
    token: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = udp.recv() => received,
        };

        match received {
            Ok((bytes, _)) if bytes.is_empty() => {}
            Ok((bytes, from)) => {
                tracing::trace!(%from, len = bytes.len(), "datagram received");
                inbound.push(String::from_utf8_lossy(&bytes).into_owned());
            }
            // ICMP errors from earlier sends surface here; the socket is fine.
            Err(e) => tracing::debug!(error = %e, "UDP receive failed"),
        }
    }

    tracing::debug!("UDP receive loop stopped");
}
