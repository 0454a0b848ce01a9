//! Error types for the protocol layer.
//!
//! Each crate in Peerlink defines its own error enum. A `ProtocolError`
//! always means the text itself is the problem: a value that cannot be
//! framed, or a record that cannot be read back.

/// Errors that can occur while validating, encoding, or decoding events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A field name or value contains a character the framing reserves.
    ///
    /// The format has no escaping, so `{ } [ ] , :` and whitespace would
    /// either split the record or be silently dropped by the reader.
    #[error("field `{field}` contains reserved character {ch:?}")]
    ReservedCharacter {
        /// The field whose name or value is at fault.
        field: String,
        /// The offending character.
        ch: char,
    },

    /// A field name or event key is empty.
    #[error("empty name in event `{0}`")]
    EmptyName(String),

    /// A record is structurally broken (missing `:`, nested braces, ...).
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A record lacks one of the reserved `key` / `netID` fields.
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    /// The `netID` field is not a non-negative integer.
    #[error("invalid netID `{0}`")]
    InvalidNetId(String),

    /// The packet is not wrapped in the `[` ... `]` envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
