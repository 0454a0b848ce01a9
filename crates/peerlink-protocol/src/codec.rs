//! Codec trait and the text codec used on both transports.
//!
//! A packet is one `[` ... `]` envelope holding comma-separated `{...}`
//! records. The encoder always writes `key` first, `netID` second, then the
//! payload fields in name order:
//!
//! ```text
//! [{key:Move,netID:2,x:3.500000,y:-1.000000},{key:Chat,netID:2,text:hi}]
//! ```
//!
//! Decoding is lenient at the packet level and strict at the record level:
//! a broken record is dropped whole (never half-applied) and the rest of the
//! packet is still read. Only a missing envelope fails the whole packet.

use std::collections::BTreeMap;

use crate::{Event, KEY_FIELD, NET_ID_FIELD, NetId, ProtocolError, Value};

/// Converts batches of events to bytes and back.
///
/// `Send + Sync + 'static` because the codec is held by long-lived
/// networking state shared with background tasks.
pub trait Codec: Send + Sync + 'static {
    /// Frames a batch of events as one packet.
    ///
    /// # Errors
    /// Fails if any event does not pass [`Event::validate`].
    fn encode(&self, events: &[Event]) -> Result<Vec<u8>, ProtocolError>;

    /// Reads every well-formed record out of one packet.
    ///
    /// # Errors
    /// Fails only if the data is not an envelope at all. Malformed records
    /// inside a valid envelope are skipped.
    fn decode(&self, data: &[u8]) -> Result<Vec<Event>, ProtocolError>;
}

/// The `[{key:value,...}]` text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn encode(&self, events: &[Event]) -> Result<Vec<u8>, ProtocolError> {
        encode_packet(events).map(String::into_bytes)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        decode_packet(&String::from_utf8_lossy(data))
    }
}

/// Serializes one event as a `{...}` record.
///
/// Payload fields named `key` or `netID` are overwritten by the event's own
/// key and network ID.
///
/// # Errors
/// Returns the [`Event::validate`] error if the event cannot be framed.
pub fn encode_record(event: &Event) -> Result<String, ProtocolError> {
    event.validate()?;

    let mut out = String::with_capacity(32 + event.fields.len() * 16);
    out.push('{');
    out.push_str(KEY_FIELD);
    out.push(':');
    out.push_str(&event.key);
    out.push(',');
    out.push_str(NET_ID_FIELD);
    out.push(':');
    out.push_str(&event.net_id.0.to_string());

    for (name, value) in &event.fields {
        if name == KEY_FIELD || name == NET_ID_FIELD {
            continue;
        }
        out.push(',');
        out.push_str(name);
        out.push(':');
        out.push_str(&value.to_wire());
    }
    out.push('}');
    Ok(out)
}

/// Serializes a batch of events into a single `[...]` envelope.
///
/// # Errors
/// Fails on the first event that does not validate; nothing is produced.
pub fn encode_packet(events: &[Event]) -> Result<String, ProtocolError> {
    let records = events
        .iter()
        .map(encode_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("[{}]", records.join(",")))
}

/// Extracts and decodes every complete `{...}` record in a packet.
///
/// Leading/trailing whitespace and NUL bytes are ignored. The closing `]`
/// is optional so that a truncated message still yields the records that
/// arrived intact; an unterminated trailing record is dropped.
///
/// # Errors
/// [`ProtocolError::MalformedEnvelope`] if the text does not start with `[`.
pub fn decode_packet(text: &str) -> Result<Vec<Event>, ProtocolError> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let body = text.strip_prefix('[').ok_or_else(|| {
        ProtocolError::MalformedEnvelope(preview(text))
    })?;
    let body = body.strip_suffix(']').unwrap_or(body);

    let mut events = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in body.char_indices() {
        match (ch, start) {
            ('{', None) => start = Some(i),
            ('}', Some(s)) => {
                match decode_record(&body[s..=i]) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed record");
                    }
                }
                start = None;
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        tracing::debug!(
            partial = %preview(&body[s..]),
            "dropping unterminated record"
        );
    }

    Ok(events)
}

/// Decodes a single `{name:value,...}` record.
///
/// Whitespace anywhere inside the record is ignored.
///
/// # Errors
/// The whole record is rejected if any field lacks `:`, has an empty name,
/// holds a second `:` or a brace, or if `key`/`netID` are missing or
/// `netID` is not a non-negative integer.
pub fn decode_record(record: &str) -> Result<Event, ProtocolError> {
    let inner = record
        .trim()
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .ok_or_else(|| {
            ProtocolError::MalformedRecord(format!(
                "not wrapped in braces: {}",
                preview(record)
            ))
        })?;

    let mut raw: BTreeMap<String, String> = BTreeMap::new();

    for part in inner.split(',') {
        let field: String = part.chars().filter(|c| !c.is_whitespace()).collect();

        if field.contains(['{', '}']) {
            return Err(ProtocolError::MalformedRecord(
                "nested braces are not supported".into(),
            ));
        }
        let (name, value) = field.split_once(':').ok_or_else(|| {
            ProtocolError::MalformedRecord(format!("field `{field}` has no `:`"))
        })?;
        if name.is_empty() {
            return Err(ProtocolError::MalformedRecord("empty field name".into()));
        }
        if value.contains(':') {
            return Err(ProtocolError::MalformedRecord(format!(
                "field `{name}` has more than one `:`"
            )));
        }
        raw.insert(name.to_string(), value.to_string());
    }

    let key = raw
        .remove(KEY_FIELD)
        .ok_or(ProtocolError::MissingField(KEY_FIELD))?;
    if key.is_empty() {
        return Err(ProtocolError::EmptyName(key));
    }
    let net_id_text = raw
        .remove(NET_ID_FIELD)
        .ok_or(ProtocolError::MissingField(NET_ID_FIELD))?;
    let net_id = net_id_text
        .parse::<u32>()
        .map(NetId)
        .map_err(|_| ProtocolError::InvalidNetId(net_id_text))?;

    Ok(Event {
        net_id,
        key,
        fields: raw
            .into_iter()
            .map(|(name, value)| (name, Value::Text(value)))
            .collect(),
    })
}

/// Short, log-safe excerpt of untrusted input.
fn preview(text: &str) -> String {
    const MAX: usize = 48;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// =========================================================================
// Tests
// =========================================================================
