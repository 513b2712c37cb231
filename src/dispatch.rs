//! Turning one frame payload into zero or more deliverable messages.
//!
//! A frame carries a single message, a `BHS` batch or an `FHS` file.
//! Containers are fanned out into their member messages so the handler
//! only ever sees single messages. One bad member never hides the rest:
//! it becomes a parse error alongside its siblings.

use crate::hl7::{self, Batch, FileBatch, Hl7ParseError, Message};
use crate::request::MessageOrigin;

/// One message extracted from a frame, ready for handler delivery.
#[derive(Debug, Clone)]
pub(crate) struct DispatchedMessage {
    pub message: Message,
    /// The message's own wire text, not the surrounding container.
    pub raw: String,
    pub origin: MessageOrigin,
}

/// Everything one frame payload expanded into, in wire order.
#[derive(Debug, Default)]
pub(crate) struct Dispatch {
    pub messages: Vec<DispatchedMessage>,
    pub errors: Vec<Hl7ParseError>,
}

impl Dispatch {
    fn push(&mut self, raw: &str, origin: MessageOrigin) {
        match Message::parse(raw) {
            Ok(message) => self.messages.push(DispatchedMessage {
                message,
                raw: raw.to_string(),
                origin,
            }),
            Err(e) => self.errors.push(e),
        }
    }
}

/// What kind of unit a payload is, judged by its leading segment.
pub(crate) fn classify(text: &str) -> MessageOrigin {
    if hl7::is_file(text) {
        MessageOrigin::File
    } else if hl7::is_batch(text) {
        MessageOrigin::Batch
    } else {
        MessageOrigin::Single
    }
}

/// Expands a decoded frame payload into its messages and parse errors.
pub(crate) fn expand(text: &str) -> Dispatch {
    let mut dispatch = Dispatch::default();
    match classify(text) {
        MessageOrigin::Single => dispatch.push(text, MessageOrigin::Single),
        MessageOrigin::Batch => match Batch::parse(text) {
            Ok(batch) => {
                for raw in batch.messages() {
                    dispatch.push(raw, MessageOrigin::Batch);
                }
            }
            Err(e) => dispatch.errors.push(e),
        },
        MessageOrigin::File => match FileBatch::parse(text) {
            Ok(file) => {
                for raw in file.messages() {
                    dispatch.push(raw, MessageOrigin::File);
                }
            }
            Err(e) => dispatch.errors.push(e),
        },
    }
    dispatch
}
