//! The inbound half of a handler invocation: one received message and
//! where it came from.

use crate::hl7::Message;

/// How a message arrived on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Alone in its frame.
    Single,
    /// Inside a `BHS`-headed batch.
    Batch,
    /// Inside an `FHS`-headed file.
    File,
}

/// One message handed to the [`InboundHandler`](crate::InboundHandler).
///
/// Messages inside a batch or file each get their own request, so the
/// handler never needs to know about containers.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    message: Message,
    raw: String,
    origin: MessageOrigin,
}

impl InboundRequest {
    pub(crate) fn new(message: Message, raw: String, origin: MessageOrigin) -> InboundRequest {
        InboundRequest {
            message,
            raw,
            origin,
        }
    }

    /// The parsed message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The message's own wire text. For a message that arrived inside a
    /// container this is just its own segment run, not the whole frame.
    pub fn raw_message(&self) -> &str {
        &self.raw
    }

    /// Whether the message arrived alone, in a batch or in a file.
    pub fn origin(&self) -> MessageOrigin {
        self.origin
    }
}
