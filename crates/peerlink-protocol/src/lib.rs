//! Wire protocol for Peerlink.
//!
//! This crate defines the text format peers exchange:
//!
//! - **Types** ([`Event`], [`Value`], [`NetId`], [`Delivery`]): a typed
//!   key/value game event addressed by network ID.
//! - **Codec** ([`Codec`] trait, [`TextCodec`]): how a batch of events
//!   becomes one `[{...},{...}]` packet and back.
//! - **Errors** ([`ProtocolError`]): what can go wrong while validating or
//!   decoding.
//!
//! # Wire format
//!
//! ```text
//! packet = "[" record ("," record)* "]"
//! record = "{" field ("," field)* "}"
//! field  = name ":" value
//! ```
//!
//! Every record carries the reserved fields `key` (event type) and `netID`
//! (originating/target peer). There is no escaping, so names and values may
//! not contain `{ } [ ] , :` or whitespace; [`Event::validate`] enforces it.
//!
//! ```text
//! Transport (bytes) → Protocol (Event) → Event bus (topic "<netID>|<key>")
//! ```

mod codec;
mod error;
mod types;

pub use codec::{
    Codec, TextCodec, decode_packet, decode_record, encode_packet,
    encode_record,
};
pub use error::ProtocolError;
pub use types::{Delivery, Event, KEY_FIELD, NET_ID_FIELD, NetId, Value};
