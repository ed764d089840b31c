//! Pipe-delimited message parsing

use crate::error::{IntelligenceError, IntelligenceResult};

/// Standard encoding characters (MSH-2)
pub const STANDARD_ENCODING: &str = "^~\\&";

/// Standard field separator (MSH-1)
pub const STANDARD_FIELD_SEPARATOR: char = '|';

/// Delimiters declared in the message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

/// How segments are separated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    CarriageReturn,
    LineFeed,
    CrLf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    /// `fields[0]` is field 1
    fields: Vec<String>,
}

impl Segment {
    /// Field `index` (1-based), if present
    pub fn field(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }

    /// Number of fields, trailing empties included
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// A parsed message
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub delimiters: Delimiters,
    /// MSH-2 exactly as written
    pub encoding: String,
    pub terminator: LineTerminator,
    pub segments: Vec<Segment>,
}

impl ParsedMessage {
    pub fn parse(raw: &str) -> IntelligenceResult<Self> {
        let raw = raw.trim_start_matches('\u{feff}').trim();
        if !raw.starts_with("MSH") {
            return Err(IntelligenceError::validation(
                "Message does not start with an MSH segment",
            ));
        }
        let field_separator = raw.chars().nth(3).ok_or_else(|| {
            IntelligenceError::validation("MSH segment too short to declare a field separator")
        })?;
        if field_separator.is_ascii_alphanumeric() || field_separator.is_whitespace() {
            return Err(IntelligenceError::validation(format!(
                "Invalid field separator '{field_separator}'"
            )));
        }

        let terminator = if raw.contains("\r\n") {
            LineTerminator::CrLf
        } else if raw.contains('\r') || !raw.contains('\n') {
            LineTerminator::CarriageReturn
        } else {
            LineTerminator::LineFeed
        };

        let header_rest = &raw[3 + field_separator.len_utf8()..];
        let encoding: String = header_rest
            .chars()
            .take_while(|c| *c != field_separator && *c != '\r' && *c != '\n')
            .collect();
        let mut encoding_chars = encoding.chars();
        let defaults = Delimiters::default();
        let delimiters = Delimiters {
            field: field_separator,
            component: encoding_chars.next().unwrap_or(defaults.component),
            repetition: encoding_chars.next().unwrap_or(defaults.repetition),
            escape: encoding_chars.next().unwrap_or(defaults.escape),
            subcomponent: encoding_chars.next().unwrap_or(defaults.subcomponent),
        };

        let segments = raw
            .split(['\r', '\n'])
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .filter_map(|line| parse_segment(line, field_separator))
            .collect();

        Ok(Self {
            delimiters,
            encoding,
            terminator,
            segments,
        })
    }

    pub fn segments_named<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.id == id)
    }

    pub fn header(&self) -> Option<&Segment> {
        self.segments.first().filter(|s| s.id == "MSH")
    }

    fn header_field(&self, index: usize) -> Option<&str> {
        self.header()?.field(index).filter(|v| !v.is_empty())
    }

    fn first_component<'a>(&self, value: &'a str) -> &'a str {
        value.split(self.delimiters.component).next().unwrap_or(value)
    }

    /// MSH-9 as `TYPE^EVENT`, normalized to `^` regardless of the declared
    /// component separator
    pub fn message_type(&self) -> Option<String> {
        let value = self.header_field(9)?;
        let parts: Vec<&str> = value
            .split(self.delimiters.component)
            .take(2)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("^"))
        }
    }

    /// MSH-3, first component
    pub fn sending_application(&self) -> Option<&str> {
        self.header_field(3).map(|v| self.first_component(v))
    }

    /// MSH-4, first component
    pub fn sending_facility(&self) -> Option<&str> {
        self.header_field(4).map(|v| self.first_component(v))
    }

    /// MSH-12, first component
    pub fn version(&self) -> Option<&str> {
        self.header_field(12).map(|v| self.first_component(v))
    }

    /// Repetitions of a field value; an empty value is one empty repetition
    pub fn repetitions<'a>(&self, value: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        value.split(self.delimiters.repetition)
    }

    pub fn components<'a>(&self, value: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        value.split(self.delimiters.component)
    }
}

fn parse_segment(line: &str, separator: char) -> Option<Segment> {
    let mut parts = line.split(separator);
    let id = parts.next()?.trim().to_string();
    if id.is_empty() {
        return None;
    }
    let mut fields: Vec<String> = Vec::new();
    if id == "MSH" {
        // MSH-1 is the separator itself
        fields.push(separator.to_string());
    }
    fields.extend(parts.map(str::to_string));
    Some(Segment { id, fields })
}
