//! Single HL7 messages: an `MSH` header followed by data segments.

use std::fmt;

use crate::hl7::{normalize_line_endings, Hl7ParseError, SEGMENT_SEPARATOR};

/// The delimiter characters a message declares in `MSH-1` and `MSH-2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separators {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Separators {
    fn default() -> Self {
        Separators {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Separators {
    /// The four characters carried in `MSH-2`, in declaration order.
    pub fn encoding_characters(&self) -> String {
        [
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ]
        .iter()
        .collect()
    }

    /// Reads the delimiters from an `MSH` line. A header that ends before
    /// all four encoding characters is rejected.
    fn from_header(line: &str) -> Result<Separators, Hl7ParseError> {
        let field = line.chars().nth(3).ok_or(Hl7ParseError::TruncatedHeader)?;
        let enc: Vec<char> = line
            .chars()
            .skip(4)
            .take_while(|c| *c != field)
            .take(4)
            .collect();
        if enc.len() < 4 {
            return Err(Hl7ParseError::TruncatedHeader);
        }
        Ok(Separators {
            field,
            component: enc[0],
            repetition: enc[1],
            escape: enc[2],
            subcomponent: enc[3],
        })
    }
}

/// One segment: a name plus its fields, in wire order.
///
/// Fields are 1-indexed as in the standard. For `MSH` the separator itself
/// is field 1 and the encoding characters are field 2, so the first stored
/// field of an `MSH` segment is `MSH-2`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    name: String,
    fields: Vec<String>,
}

impl Segment {
    pub(crate) fn new(name: impl Into<String>) -> Segment {
        Segment {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    fn parse(line: &str, field_separator: char) -> Segment {
        let mut parts = line.split(field_separator).map(str::to_string);
        let name = parts.next().unwrap_or_default();
        Segment {
            name,
            fields: parts.collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value of a 1-indexed field, `None` when the segment does
    /// not extend that far. `MSH-1` is the field separator itself and is
    /// not reachable here; read it through [`Message::separators`].
    pub fn field(&self, number: usize) -> Option<&str> {
        self.fields.get(self.field_index(number)?).map(String::as_str)
    }

    fn field_index(&self, number: usize) -> Option<usize> {
        if self.name == "MSH" {
            number.checked_sub(2)
        } else {
            number.checked_sub(1)
        }
    }

    fn encode_into(&self, out: &mut String, field_separator: char) {
        out.push_str(&self.name);
        for field in &self.fields {
            out.push(field_separator);
            out.push_str(field);
        }
    }
}

/// A parsed HL7 message.
///
/// ```
/// use hl7_mllp_server::hl7::Message;
///
/// let msg = Message::parse("MSH|^~\\&|HIS|RIH|LIS|RIH|202401020304||ADT^A01|MSG001|P|2.3\rPID|1||42")
///     .expect("valid message");
/// assert_eq!(msg.get("MSH.9.1"), Some("ADT"));
/// assert_eq!(msg.control_id(), Some("MSG001"));
/// assert_eq!(msg.get("PID.3"), Some("42"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    separators: Separators,
    segments: Vec<Segment>,
}

impl Message {
    /// Parses pipe-and-hat text. The text must open with an `MSH` segment
    /// long enough to declare the delimiters; everything after that is
    /// accepted as-is.
    pub fn parse(text: &str) -> Result<Message, Hl7ParseError> {
        let text = normalize_line_endings(text);
        if text.is_empty() {
            return Err(Hl7ParseError::EmptyInput);
        }
        if !text.starts_with("MSH") {
            return Err(Hl7ParseError::wrong_header("MSH", &text));
        }
        let header = text.split(SEGMENT_SEPARATOR).next().unwrap_or_default();
        let separators = Separators::from_header(header)?;
        let segments = text
            .split(SEGMENT_SEPARATOR)
            .filter(|line| !line.is_empty())
            .map(|line| Segment::parse(line, separators.field))
            .collect();
        Ok(Message {
            separators,
            segments,
        })
    }

    /// Creates a message holding only an `MSH` segment with the default
    /// delimiters, ready to be filled in field by field.
    pub fn new() -> Message {
        let separators = Separators::default();
        let header = Segment {
            name: "MSH".to_string(),
            fields: vec![separators.encoding_characters()],
        };
        Message {
            separators,
            segments: vec![header],
        }
    }

    pub fn separators(&self) -> Separators {
        self.separators
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The first segment with the given name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    fn segment_mut(&mut self, name: &str) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.name == name)
    }

    /// Appends an empty segment with the given name.
    pub fn push_segment(&mut self, name: impl Into<String>) {
        self.segments.push(Segment::new(name));
    }

    /// Looks a value up by path: `"MSH.9"` for a whole field, `"MSH.9.2"`
    /// for one component of it. Returns `None` when the path is malformed
    /// or the message does not extend that far; a present-but-empty field
    /// is `Some("")`.
    pub fn get(&self, path: &str) -> Option<&str> {
        let (segment, field, component) = parse_path(path)?;
        let value = self.segment(segment)?.field(field)?;
        match component {
            None => Some(value),
            Some(n) => value.split(self.separators.component).nth(n - 1),
        }
    }

    /// Replaces a whole field, growing the segment with empty fields as
    /// needed. Unknown segments and field number 0 are ignored. Setting
    /// `MSH-1` replaces the field separator itself.
    pub fn set_field(&mut self, segment: &str, field: usize, value: &str) {
        if field == 0 {
            return;
        }
        if segment == "MSH" && field == 1 {
            if let Some(c) = value.chars().next() {
                self.separators.field = c;
            }
            return;
        }
        let Some(seg) = self.segment_mut(segment) else {
            return;
        };
        let Some(index) = seg.field_index(field) else {
            return;
        };
        if seg.fields.len() <= index {
            seg.fields.resize(index + 1, String::new());
        }
        seg.fields[index] = value.to_string();
    }

    /// Replaces one component of a field, keeping its siblings and growing
    /// the field with empty components as needed.
    pub fn set_component(&mut self, segment: &str, field: usize, component: usize, value: &str) {
        if field == 0 || component == 0 || (segment == "MSH" && field == 1) {
            return;
        }
        let component_separator = self.separators.component;
        let Some(seg) = self.segment_mut(segment) else {
            return;
        };
        let Some(index) = seg.field_index(field) else {
            return;
        };
        if seg.fields.len() <= index {
            seg.fields.resize(index + 1, String::new());
        }
        let current = &seg.fields[index];
        let mut components: Vec<String> = if current.is_empty() {
            Vec::new()
        } else {
            current
                .split(component_separator)
                .map(str::to_string)
                .collect()
        };
        if components.len() < component {
            components.resize(component, String::new());
        }
        components[component - 1] = value.to_string();
        seg.fields[index] = components.join(&component_separator.to_string());
    }

    /// `MSH-10`, when present and readable.
    pub fn control_id(&self) -> Option<&str> {
        self.get("MSH.10")
    }

    /// Renders the message back to pipe-and-hat text with `\r` segment
    /// separators and no trailing separator.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEGMENT_SEPARATOR);
            }
            segment.encode_into(&mut out, self.separators.field);
        }
        out
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_path(path: &str) -> Option<(&str, usize, Option<usize>)> {
    let mut parts = path.split('.');
    let segment = parts.next().filter(|s| !s.is_empty())?;
    let field: usize = parts.next()?.parse().ok()?;
    if field == 0 {
        return None;
    }
    let component = match parts.next() {
        Some(c) => {
            let n: usize = c.parse().ok()?;
            if n == 0 {
                return None;
            }
            Some(n)
        }
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((segment, field, component))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT: &str =
        "MSH|^~\\&|HIS|RIH|LIS|RIH|202401020304||ADT^A01|MSG001|P|2.3\rPID|1||42^^^MRN||DOE^JOHN";

    #[test]
    fn parses_a_simple_message() {
        let msg = Message::parse(ADT).unwrap();
        assert_eq!(msg.segments().len(), 2);
        assert_eq!(msg.get("MSH.3"), Some("HIS"));
        assert_eq!(msg.get("MSH.9"), Some("ADT^A01"));
        assert_eq!(msg.get("MSH.9.2"), Some("A01"));
        assert_eq!(msg.get("MSH.12"), Some("2.3"));
        assert_eq!(msg.get("PID.5.2"), Some("JOHN"));
        assert_eq!(msg.control_id(), Some("MSG001"));
    }

    #[test]
    fn msh_offsets_follow_the_standard() {
        let msg = Message::parse(ADT).unwrap();
        // MSH-2 is the encoding characters, the first stored field.
        assert_eq!(msg.get("MSH.2"), Some("^~\\&"));
        assert_eq!(msg.separators().field, '|');
    }

    #[test]
    fn missing_and_empty_fields_are_distinct() {
        let msg = Message::parse(ADT).unwrap();
        assert_eq!(msg.get("MSH.8"), Some(""));
        assert_eq!(msg.get("MSH.30"), None);
        assert_eq!(msg.get("PID.5.3"), None);
        assert_eq!(msg.get("OBX.1"), None);
    }

    #[test]
    fn rejects_text_without_a_header() {
        assert_eq!(
            Message::parse("PID|1||42"),
            Err(Hl7ParseError::WrongHeader {
                expected: "MSH",
                found: "PID|1||4".to_string()
            })
        );
        assert_eq!(Message::parse(""), Err(Hl7ParseError::EmptyInput));
        assert_eq!(Message::parse("\r\n"), Err(Hl7ParseError::EmptyInput));
    }

    #[test]
    fn rejects_a_truncated_header() {
        assert_eq!(Message::parse("MSH"), Err(Hl7ParseError::TruncatedHeader));
        assert_eq!(Message::parse("MSH|"), Err(Hl7ParseError::TruncatedHeader));
        assert_eq!(Message::parse("MSH|^~"), Err(Hl7ParseError::TruncatedHeader));
    }

    #[test]
    fn accepts_alternate_line_endings() {
        let msg = Message::parse("MSH|^~\\&|A|B|C|D|E||ORU^R01|X1|P|2.3\nOBX|1|TX|NOTE\r\n").unwrap();
        assert_eq!(msg.segments().len(), 2);
        assert_eq!(msg.get("OBX.3"), Some("NOTE"));
    }

    #[test]
    fn honours_nonstandard_delimiters() {
        let msg = Message::parse("MSH#*~\\&#APP#FAC###202401020304##ADT*A04#C1#P#2.5").unwrap();
        assert_eq!(msg.separators().field, '#');
        assert_eq!(msg.get("MSH.9.2"), Some("A04"));
        assert_eq!(msg.get("MSH.3"), Some("APP"));
    }

    #[test]
    fn set_field_grows_the_segment() {
        let mut msg = Message::new();
        msg.set_field("MSH", 9, "ACK");
        msg.set_field("MSH", 12, "2.7");
        assert_eq!(msg.get("MSH.9"), Some("ACK"));
        assert_eq!(msg.get("MSH.10"), Some(""));
        assert_eq!(msg.get("MSH.12"), Some("2.7"));
    }

    #[test]
    fn set_component_keeps_siblings() {
        let mut msg = Message::parse(ADT).unwrap();
        msg.set_component("MSH", 9, 3, "ACK");
        assert_eq!(msg.get("MSH.9"), Some("ADT^A01^ACK"));
        msg.set_component("MSH", 9, 2, "A08");
        assert_eq!(msg.get("MSH.9"), Some("ADT^A08^ACK"));
    }

    #[test]
    fn set_component_on_an_empty_field_pads_with_empties() {
        let mut msg = Message::new();
        msg.set_component("MSH", 9, 3, "ACK");
        assert_eq!(msg.get("MSH.9"), Some("^^ACK"));
    }

    #[test]
    fn encode_round_trips_the_header() {
        let msg = Message::parse(ADT).unwrap();
        assert_eq!(msg.encode(), ADT);
    }

    #[test]
    fn built_messages_encode_with_the_default_delimiters() {
        let mut msg = Message::new();
        msg.set_field("MSH", 9, "ACK^A01^ACK");
        msg.set_field("MSH", 10, "C99");
        msg.push_segment("MSA");
        msg.set_field("MSA", 1, "AA");
        msg.set_field("MSA", 2, "MSG001");
        assert_eq!(
            msg.encode(),
            "MSH|^~\\&|||||||ACK^A01^ACK|C99\rMSA|AA|MSG001"
        );
    }
}
