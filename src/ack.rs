//! Acknowledgement synthesis: building the `ACK`/`NACK` message that
//! answers an inbound message.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::config::MshOverride;
use crate::hl7::Message;

/// `MSA-1` acknowledgement codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    /// Application Accept
    AA,
    /// Application Reject
    AR,
    /// Application Error
    AE,
}

impl AckCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckCode::AA => "AA",
            AckCode::AR => "AR",
            AckCode::AE => "AE",
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acknowledgement that was built for one inbound message, kept for
/// introspection after it has gone out.
#[derive(Debug, Clone)]
pub struct AckRecord {
    pub message: Message,
    /// The code actually sent. Differs from the requested one when the
    /// inbound header was too damaged to acknowledge properly.
    pub code: AckCode,
}

// Feeds the fresh-per-ack control identifiers.
static CONTROL_ID_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_control_id() -> String {
    let seq = CONTROL_ID_SEQ.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("ACK{}{:04}", Utc::now().format("%Y%m%d%H%M%S"), seq)
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Builds the acknowledgement for `original` with the requested code.
///
/// The normal path mirrors the inbound header back: sender and receiver
/// swapped, a fresh timestamp and control identifier, the original trigger
/// event inside `MSH-9`, and the original processing ID and version copied
/// through. When the inbound header is missing its trigger event or control
/// identifier the requested code is abandoned and a minimal Application
/// Error ack is produced instead, so the sender always hears something.
/// Listener overrides are stamped on last, on either path.
pub(crate) fn build(original: &Message, code: AckCode, overrides: &[MshOverride]) -> AckRecord {
    let (mut message, code) = match derive(original, code) {
        Some(message) => (message, code),
        None => (fallback(original), AckCode::AE),
    };
    for o in overrides {
        match o.component {
            None => message.set_field("MSH", o.field, &o.value),
            Some(component) => message.set_component("MSH", o.field, component, &o.value),
        }
    }
    AckRecord { message, code }
}

fn derive(original: &Message, code: AckCode) -> Option<Message> {
    let trigger = original.get("MSH.9.2").filter(|t| !t.is_empty())?;
    let control_id = original.control_id().filter(|id| !id.is_empty())?;

    let mut ack = Message::new();
    ack.set_field("MSH", 3, original.get("MSH.5").unwrap_or_default());
    ack.set_field("MSH", 4, original.get("MSH.6").unwrap_or_default());
    ack.set_field("MSH", 5, original.get("MSH.3").unwrap_or_default());
    ack.set_field("MSH", 6, original.get("MSH.4").unwrap_or_default());
    ack.set_field("MSH", 7, &timestamp());
    ack.set_field("MSH", 9, &format!("ACK^{trigger}^ACK"));
    ack.set_field("MSH", 10, &next_control_id());
    ack.set_field("MSH", 11, original.get("MSH.11").unwrap_or_default());
    ack.set_field("MSH", 12, original.get("MSH.12").unwrap_or_default());
    ack.push_segment("MSA");
    ack.set_field("MSA", 1, code.as_str());
    ack.set_field("MSA", 2, control_id);
    Some(ack)
}

/// The bare-minimum ack for a message whose header cannot be mirrored.
fn fallback(original: &Message) -> Message {
    let mut ack = Message::new();
    ack.set_field("MSH", 7, &timestamp());
    ack.set_field("MSH", 9, "ACK");
    ack.set_field("MSH", 10, &next_control_id());
    ack.set_field("MSH", 11, "P");
    ack.set_field("MSH", 12, "2.7");
    ack.push_segment("MSA");
    ack.set_field("MSA", 1, AckCode::AE.as_str());
    ack.set_field("MSA", 2, original.control_id().unwrap_or_default());
    ack
}
