//! A small lobby: one process hosts, others join, everyone wanders around.
//!
//! ```text
//! cargo run -p lobby -- host [port] [peer_udp_port]
//! cargo run -p lobby -- join <address> [port] [udp_port]
//! ```
//!
//! Both sides use the TCP port for UDP unless told otherwise. To run a
//! client on the host's machine, give it its own `udp_port` and pass the
//! same value to the host as `peer_udp_port`:
//!
//! ```text
//! cargo run -p lobby -- host 9999 9998
//! cargo run -p lobby -- join 127.0.0.1 9999 9998
//! ```
//!
//! The host starts the game once a second player is in. Positions go out
//! over UDP every tick, lobby traffic over TCP.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use peerlink::prelude::*;
use peerlink::session::MAX_PLAYERS;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 9999;
const TICK_RATE_HZ: u32 = 20;
/// Ticks to play before leaving.
const GAME_TICKS: u64 = 200;

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Wanderer {
    x: f64,
    y: f64,
    heading: f64,
}

impl Wanderer {
    fn spawn(id: NetId) -> Self {
        let angle = f64::from(id.0) * std::f64::consts::FRAC_PI_4;
        Self {
            x: angle.cos() * 10.0,
            y: angle.sin() * 10.0,
            heading: angle + std::f64::consts::FRAC_PI_2,
        }
    }

    /// Walks a circle, one step per tick.
    fn step(&mut self, dt: f64) {
        const SPEED: f64 = 2.0;
        const TURN_RATE: f64 = 0.2;

        self.heading += TURN_RATE * dt;
        self.x += self.heading.cos() * SPEED * dt;
        self.y += self.heading.sin() * SPEED * dt;
    }

    fn to_event(self, id: NetId) -> Event {
        Event::new(id, "Move").with("x", self.x).with("y", self.y)
    }

    fn from_event(ev: &Event) -> Option<(f64, f64)> {
        Some((ev.get("x")?.as_f64()?, ev.get("y")?.as_f64()?))
    }
}

/// Last known position of every remote player.
#[derive(Default, Clone)]
struct Positions(Arc<Mutex<BTreeMap<NetId, (f64, f64)>>>);

impl Positions {
    fn record(&self, id: NetId, pos: (f64, f64)) {
        self.0.lock().insert(id, pos);
    }

    fn snapshot(&self) -> BTreeMap<NetId, (f64, f64)> {
        self.0.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Mode {
    Host { port: u16, peer_udp_port: Option<u16> },
    Join { address: String, port: u16, udp_port: Option<u16> },
}

fn parse_args(args: &[String]) -> Result<Mode, String> {
    let optional_port = |i: usize| -> Result<Option<u16>, String> {
        args.get(i)
            .map(|p| p.parse().map_err(|_| format!("invalid port {p:?}")))
            .transpose()
    };

    match args.first().map(String::as_str) {
        Some("host") => Ok(Mode::Host {
            port: optional_port(1)?.unwrap_or(DEFAULT_PORT),
            peer_udp_port: optional_port(2)?,
        }),
        Some("join") => {
            let address = args.get(1).ok_or("join needs an address")?.clone();
            Ok(Mode::Join {
                address,
                port: optional_port(2)?.unwrap_or(DEFAULT_PORT),
                udp_port: optional_port(3)?,
            })
        }
        _ => Err(
            "usage: lobby host [port] [peer_udp_port] | lobby join <address> [port] [udp_port]"
                .into(),
        ),
    }
}

fn config_for(mode: &Mode) -> NetConfig {
    match mode {
        Mode::Host { port, peer_udp_port } => {
            let config = NetConfig::default().with_target("0.0.0.0", *port);
            match peer_udp_port {
                // Clients listen here instead of on the TCP port.
                Some(peer) => config.with_udp_ports(*port, *peer),
                None => config,
            }
        }
        Mode::Join { address, port, udp_port } => {
            let config = NetConfig::default().with_target(address.clone(), *port);
            match udp_port {
                // Binds `local`, still sends to the host's port. The host
                // must be started with the same value as `peer_udp_port`.
                Some(local) => config.with_udp_ports(*local, *port),
                None => config,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

fn subscribe_game_events(net: &NetworkManager, positions: &Positions, started: &Arc<AtomicBool>) {
    for raw in 0..MAX_PLAYERS as u32 {
        let positions = positions.clone();
        net.bus().subscribe(
            &format!("{raw}|Move"),
            Arc::new(move |ev: &Event| {
                if let Some(pos) = Wanderer::from_event(ev) {
                    positions.record(ev.net_id, pos);
                }
            }),
        );
    }

    let started = Arc::clone(started);
    net.bus().subscribe(
        "0|Start",
        Arc::new(move |_: &Event| started.store(true, Ordering::SeqCst)),
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;
    let mut net = NetworkManager::new(config_for(&mode));

    let positions = Positions::default();
    let started = Arc::new(AtomicBool::new(false));
    subscribe_game_events(&net, &positions, &started);

    match mode {
        Mode::Host { .. } => net.host().await?,
        Mode::Join { .. } => net.join().await?,
    }

    let mut ticks = TickScheduler::with_rate(TICK_RATE_HZ);
    let mut me: Option<Wanderer> = None;

    loop {
        let tick = tokio::select! {
            tick = ticks.wait_for_tick() => tick,
            _ = tokio::signal::ctrl_c() => break,
        };

        net.poll_events();
        if !net.is_connected() {
            info!("connection lost");
            break;
        }

        match net.phase() {
            Phase::Lobby if net.is_host() && net.player_count() >= 2 => {
                net.start_game()?;
                net.prepare_tcp(Event::new(NetId::HOST, "Start"))?;
                info!(players = net.player_count(), "game started");
            }
            Phase::Lobby if !net.is_host() && started.load(Ordering::SeqCst) => {
                net.start_game_client()?;
                info!("game started");
            }
            Phase::Started => {
                if let Some(id) = net.assigned_id() {
                    let wanderer = me.get_or_insert_with(|| Wanderer::spawn(id));
                    wanderer.step(tick.dt.as_secs_f64());
                    net.prepare_udp(wanderer.to_event(id))?;
                }
                if tick.tick % u64::from(TICK_RATE_HZ) == 0 {
                    info!(tick = tick.tick, others = ?positions.snapshot(), "positions");
                }
                if tick.tick >= GAME_TICKS {
                    break;
                }
            }
            _ => {}
        }

        net.flush().await;
        ticks.record_tick_end();
    }

    net.reset().await;
    info!(ticks = ticks.stats().total_ticks, "bye");
    Ok(())
}
