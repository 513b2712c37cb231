//! A small HL7 v2.x "pipe and hat" model, covering just enough of the
//! standard to receive messages, walk their fields and build
//! acknowledgements.
//!
//! Parsing is deliberately lenient: any text opening with a well formed
//! `MSH` segment is accepted, unknown segments are carried as-is, and no
//! message-type grammar is enforced. Strictness belongs to the
//! applications exchanging the messages, not the transport.

pub mod batch;
pub mod message;

pub use batch::{is_batch, is_file, Batch, FileBatch};
pub use message::{Message, Segment, Separators};

use thiserror::Error;

/// Segments are separated by a carriage return, per the standard.
pub const SEGMENT_SEPARATOR: char = '\r';

/// Problems encountered while parsing HL7 text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Hl7ParseError {
    #[error("message text is empty")]
    EmptyInput,

    /// The text does not open with the segment the caller asked for
    /// (`MSH` for messages, `BHS` for batches, `FHS` for files).
    #[error("expected the text to open with {expected:?}, found {found:?}")]
    WrongHeader {
        expected: &'static str,
        found: String,
    },

    /// The `MSH` segment ends before all five delimiters are declared.
    #[error("MSH segment is too short to declare the message delimiters")]
    TruncatedHeader,
}

impl Hl7ParseError {
    pub(crate) fn wrong_header(expected: &'static str, text: &str) -> Hl7ParseError {
        Hl7ParseError::WrongHeader {
            expected,
            found: text.chars().take(8).collect(),
        }
    }
}

/// Accept `\r\n` and bare `\n` in place of the standard `\r`, and drop
/// leading/trailing segment separators.
pub(crate) fn normalize_line_endings(text: &str) -> String {
    let text = text.replace("\r\n", "\r").replace('\n', "\r");
    text.trim_matches(SEGMENT_SEPARATOR).to_string()
}
