//! Core protocol types: what a game event looks like before it is framed.
//!
//! An [`Event`] is a small record: who it concerns ([`NetId`]), what kind
//! of event it is (`key`), and a map of named [`Value`]s. Game code builds
//! these, the outbound batch frames them, and the receiving side publishes
//! them on the event bus under the topic `"<netID>|<key>"`.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Reserved field carrying the event type on the wire.
pub const KEY_FIELD: &str = "key";

/// Reserved field carrying the network ID on the wire.
pub const NET_ID_FIELD: &str = "netID";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A peer's network identity inside one session.
///
/// The host is always `NetId(0)`; each accepted client gets the lowest free
/// small integer. `#[serde(transparent)]` keeps it a plain number in config
/// files and logs that serialize it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetId(pub u32);

impl NetId {
    /// The host's reserved identity.
    pub const HOST: NetId = NetId(0);

    /// Returns `true` for the host's reserved ID.
    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Which transport an event is queued for.
///
/// Mirrors the two sockets every peer owns: a TCP link for things that must
/// arrive (chat, spawns, handshakes) and a UDP socket for state that is
/// re-sent every frame anyway (positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Delivery {
    /// Reliable and ordered per connection. Sent over TCP.
    #[default]
    Reliable,
    /// Best effort, may be lost or reordered. Sent over UDP.
    Unreliable,
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A typed field value.
///
/// Everything travels as text, so decoding always produces [`Value::Text`].
/// The typed variants exist for the sending side, and the `as_*` accessors
/// parse text on demand, so subscribers never cast blindly.
///
/// Two values are equal when they encode to the same wire text, so
/// `Value::Int(3) == Value::Text("3".into())`. This is what makes a
/// decode of an encode compare equal to the original event.
#[derive(Debug, Clone)]
pub enum Value {
    /// Free-form text.
    Text(String),
    /// A signed integer.
    Int(i64),
    /// A float, emitted with six decimal places.
    Float(f64),
    /// `true` / `false`.
    Bool(bool),
}

impl Value {
    /// Returns the exact text this value occupies on the wire.
    pub fn to_wire(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Int(i) => Cow::Owned(i.to_string()),
            Self::Float(f) => Cow::Owned(format!("{f:.6}")),
            Self::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        }
    }

    /// Returns the text if this is a [`Value::Text`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Reads the value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Reads the value as a float. Integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Text(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Reads the value as a boolean (`true` / `false` only).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.to_wire() == other.to_wire()
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f64::from(f))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One game event: a network ID, an event type, and named values.
///
/// ```rust
/// use peerlink_protocol::{Event, NetId};
///
/// let ev = Event::new(NetId(2), "Move").with("x", 3.5).with("y", -1.0);
/// assert_eq!(ev.topic(), "2|Move");
/// assert_eq!(ev.get("x").and_then(|v| v.as_f64()), Some(3.5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The peer this event concerns (sender or target, by convention).
    pub net_id: NetId,
    /// Event type, e.g. `Move` or `ACCEPT`.
    pub key: String,
    /// Payload fields. `BTreeMap` keeps the wire order deterministic.
    pub fields: BTreeMap<String, Value>,
}

impl Event {
    /// Creates an event with no payload fields.
    pub fn new(net_id: NetId, key: impl Into<String>) -> Self {
        Self {
            net_id,
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a field, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Adds (or replaces) a field in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Looks up a payload field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The event-bus topic this event is published under: `"<netID>|<key>"`.
    pub fn topic(&self) -> String {
        format!("{}|{}", self.net_id.0, self.key)
    }

    /// Checks that the event can be framed without corrupting the packet.
    ///
    /// Fields named `key` or `netID` are allowed here; the encoder replaces
    /// them with the event's own key and network ID.
    ///
    /// # Errors
    /// - [`ProtocolError::EmptyName`] for an empty key or field name.
    /// - [`ProtocolError::ReservedCharacter`] if any name or value contains
    ///   a framing character or whitespace.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.key.is_empty() {
            return Err(ProtocolError::EmptyName(self.key.clone()));
        }
        check_text(KEY_FIELD, &self.key)?;

        for (name, value) in &self.fields {
            if name.is_empty() {
                return Err(ProtocolError::EmptyName(self.key.clone()));
            }
            check_text(name, name)?;
            check_text(name, &value.to_wire())?;
        }
        Ok(())
    }
}

/// Returns `true` for characters that cannot appear inside a name or value.
pub(crate) fn is_reserved(ch: char) -> bool {
    matches!(ch, '{' | '}' | '[' | ']' | ',' | ':' | '\0') || ch.is_whitespace()
}

fn check_text(field: &str, text: &str) -> Result<(), ProtocolError> {
    match text.chars().find(|c| is_reserved(*c)) {
        Some(ch) => Err(ProtocolError::ReservedCharacter {
            field: field.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

// =========================================================================
// Tests
// =========================================================================
