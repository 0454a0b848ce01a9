//! Network configuration.

use serde::{Deserialize, Serialize};

use peerlink_session::MAX_PLAYERS;
use peerlink_transport::{DEFAULT_MAX_DATAGRAM, DEFAULT_MAX_MESSAGE};

/// Where to listen, where to connect, and how big things may get.
///
/// Set once before [`host`](crate::NetworkManager::host) or
/// [`join`](crate::NetworkManager::join). Every field has a default, so a
/// partial TOML or JSON document deserializes fine.
///
/// ```rust
/// use peerlink::NetConfig;
///
/// let config = NetConfig::default()
///     .with_target("192.168.1.20", 7000)
///     .with_udp_ports(7001, 7000);
/// assert_eq!(config.local_udp_port(), 7001);
/// assert_eq!(config.remote_udp_port(), 7000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Host to connect to when joining.
    pub address: String,
    /// Local interface to bind when hosting (and for the client's UDP socket).
    pub bind_address: String,
    /// TCP port: the host listens on it, a client connects to it.
    pub port: u16,
    /// Local UDP port. `None` means the same number as `port`.
    pub udp_port: Option<u16>,
    /// UDP port datagrams are addressed to on the other side. `None`
    /// means the same number as `port`.
    pub peer_udp_port: Option<u16>,
    /// Receive buffer per TCP link, and the longest message delivered intact.
    pub max_tcp_message: usize,
    /// UDP receive buffer.
    pub max_udp_packet: usize,
    /// Player table capacity, host included.
    pub max_players: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 9999,
            udp_port: None,
            peer_udp_port: None,
            max_tcp_message: DEFAULT_MAX_MESSAGE,
            max_udp_packet: DEFAULT_MAX_DATAGRAM,
            max_players: MAX_PLAYERS,
        }
    }
}

impl NetConfig {
    /// Sets the host address and TCP port.
    pub fn set_target(&mut self, address: impl Into<String>, port: u16) {
        self.address = address.into();
        self.port = port;
    }

    /// Builder form of [`set_target`](Self::set_target).
    pub fn with_target(mut self, address: impl Into<String>, port: u16) -> Self {
        self.set_target(address, port);
        self
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    /// Sets the local and remote UDP ports, for peers sharing one machine.
    pub fn with_udp_ports(mut self, local: u16, peer: u16) -> Self {
        self.udp_port = Some(local);
        self.peer_udp_port = Some(peer);
        self
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    /// The UDP port this peer binds.
    pub fn local_udp_port(&self) -> u16 {
        self.udp_port.unwrap_or(self.port)
    }

    /// The UDP port datagrams are sent to.
    pub fn remote_udp_port(&self) -> u16 {
        self.peer_udp_port.unwrap_or(self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 9999);
        assert_eq!(config.local_udp_port(), 9999);
        assert_eq!(config.remote_udp_port(), 9999);
        assert_eq!(config.max_tcp_message, 4096);
        assert_eq!(config.max_players, 16);
    }

    #[test]
    fn test_set_target() {
        let mut config = NetConfig::default();
        config.set_target("10.0.0.5", 4000);
        assert_eq!(config.address, "10.0.0.5");
        assert_eq!(config.port, 4000);
        assert_eq!(config.local_udp_port(), 4000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NetConfig =
            serde_json::from_str(r#"{"port": 7000, "udp_port": 7001}"#).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.local_udp_port(), 7001);
        assert_eq!(config.remote_udp_port(), 7000);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_json_round_trip() {
        let config = NetConfig::default()
            .with_target("example.org", 1234)
            .with_max_players(4);
        let json = serde_json::to_string(&config).unwrap();
        let back: NetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
