//! Per-frame outbound batches.

use peerlink_protocol::{Codec, Event, ProtocolError};

/// Events queued for one transport during the current frame.
///
/// Events are validated when queued, so a bad one is refused at the call
/// site and the packet built at flush time always frames cleanly.
#[derive(Debug, Default)]
pub(crate) struct OutboundBatch {
    events: Vec<Event>,
}

impl OutboundBatch {
    pub(crate) fn push(&mut self, event: Event) -> Result<(), ProtocolError> {
        event.validate()?;
        self.events.push(event);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }

    /// Encodes every queued event as one packet and empties the batch.
    ///
    /// Returns `None` when nothing is queued.
    pub(crate) fn take_packet<C: Codec>(&mut self, codec: &C) -> Option<Vec<u8>> {
        if self.events.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.events);
        match codec.encode(&events) {
            Ok(packet) => Some(packet),
            Err(e) => {
                tracing::debug!(error = %e, count = events.len(), "dropping unframeable batch");
                None
            }
        }
    }
}
