//! Batch (`BHS`...`BTS`) and file (`FHS`...`FTS`) containers.
//!
//! Containers are split into the raw text of their inner messages without
//! parsing those messages, so one malformed element never hides its
//! siblings. Trailer counts are not checked.

use crate::hl7::{normalize_line_endings, Hl7ParseError, SEGMENT_SEPARATOR};

/// True when the text opens with a batch header segment.
pub fn is_batch(text: &str) -> bool {
    text.starts_with("BHS")
}

/// True when the text opens with a file header segment.
pub fn is_file(text: &str) -> bool {
    text.starts_with("FHS")
}

/// A `BHS`-headed batch, split into the raw text of its messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    messages: Vec<String>,
}

impl Batch {
    pub fn parse(text: &str) -> Result<Batch, Hl7ParseError> {
        Ok(Batch {
            messages: split_container(text, "BHS")?,
        })
    }

    /// The contained messages in wire order, each one the exact segment
    /// run from its `MSH` up to (not including) the next header or
    /// trailer.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// An `FHS`-headed file, split into the raw text of all messages across
/// its contained batches.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBatch {
    messages: Vec<String>,
}

impl FileBatch {
    pub fn parse(text: &str) -> Result<FileBatch, Hl7ParseError> {
        Ok(FileBatch {
            messages: split_container(text, "FHS")?,
        })
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Walks the container's segments, starting a new message at each `MSH`
/// line and closing the current one at any header or trailer line.
/// Segments before the first `MSH` belong to the container itself.
fn split_container(text: &str, expected: &'static str) -> Result<Vec<String>, Hl7ParseError> {
    let text = normalize_line_endings(text);
    if text.is_empty() {
        return Err(Hl7ParseError::EmptyInput);
    }
    if !text.starts_with(expected) {
        return Err(Hl7ParseError::wrong_header(expected, &text));
    }

    let mut messages = Vec::new();
    let mut current: Option<String> = None;
    for line in text.split(SEGMENT_SEPARATOR) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("MSH") {
            messages.extend(current.take());
            current = Some(line.to_string());
        } else if is_container_boundary(line) {
            messages.extend(current.take());
        } else if let Some(message) = current.as_mut() {
            message.push(SEGMENT_SEPARATOR);
            message.push_str(line);
        }
    }
    messages.extend(current);
    Ok(messages)
}

fn is_container_boundary(line: &str) -> bool {
    ["BHS", "BTS", "FHS", "FTS"]
        .iter()
        .any(|name| line.starts_with(name))
}
