//! Search filters: string form (RFC 4515), BER form and entry matching

use crate::ber::{decode_string, tag, BerReader, BerWriter};
use crate::entry::Entry;
use crate::error::LdapError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

mod filter_tag {
    pub const AND: u8 = 0xA0;
    pub const OR: u8 = 0xA1;
    pub const NOT: u8 = 0xA2;
    pub const EQUALITY: u8 = 0xA3;
    pub const SUBSTRING: u8 = 0xA4;
    pub const GREATER_OR_EQUAL: u8 = 0xA5;
    pub const LESS_OR_EQUAL: u8 = 0xA6;
    pub const PRESENT: u8 = 0x87;
    pub const APPROXIMATE: u8 = 0xA8;

    pub const SUB_INITIAL: u8 = 0x80;
    pub const SUB_ANY: u8 = 0x81;
    pub const SUB_FINAL: u8 = 0x82;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attribute: String, value: String },
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        final_value: Option<String>,
    },
    GreaterOrEqual { attribute: String, value: String },
    LessOrEqual { attribute: String, value: String },
    Present(String),
    Approximate { attribute: String, value: String },
}

impl Filter {
    pub fn equality(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equality {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present(attribute.into())
    }

    /// Parse the RFC 4515 string representation. A bare `attr=value` without
    /// the enclosing parentheses is accepted too.
    pub fn parse(s: &str) -> Result<Self, LdapError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LdapError::Filter("empty filter".into()));
        }
        let owned;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            owned = format!("({trimmed})");
            &owned
        };
        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
        };
        let filter = parser.parse_filter()?;
        if parser.pos != parser.input.len() {
            return Err(LdapError::Filter(format!(
                "unexpected trailing data at offset {} in '{s}'",
                parser.pos
            )));
        }
        Ok(filter)
    }

    pub fn write_to(&self, writer: &mut BerWriter) {
        match self {
            Filter::And(parts) | Filter::Or(parts) => {
                let t = if matches!(self, Filter::And(_)) {
                    filter_tag::AND
                } else {
                    filter_tag::OR
                };
                let seq = writer.begin_sequence(t);
                for part in parts {
                    part.write_to(writer);
                }
                writer.end_sequence(seq);
            }
            Filter::Not(inner) => {
                let seq = writer.begin_sequence(filter_tag::NOT);
                inner.write_to(writer);
                writer.end_sequence(seq);
            }
            Filter::Equality { attribute, value } => {
                write_assertion(writer, filter_tag::EQUALITY, attribute, value)
            }
            Filter::GreaterOrEqual { attribute, value } => {
                write_assertion(writer, filter_tag::GREATER_OR_EQUAL, attribute, value)
            }
            Filter::LessOrEqual { attribute, value } => {
                write_assertion(writer, filter_tag::LESS_OR_EQUAL, attribute, value)
            }
            Filter::Approximate { attribute, value } => {
                write_assertion(writer, filter_tag::APPROXIMATE, attribute, value)
            }
            Filter::Present(attribute) => {
                writer.add_element(filter_tag::PRESENT, attribute.as_bytes())
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                final_value,
            } => {
                let seq = writer.begin_sequence(filter_tag::SUBSTRING);
                writer.add_octet_string(attribute);
                let subs = writer.begin_sequence(tag::SEQUENCE);
                if let Some(i) = initial {
                    writer.add_element(filter_tag::SUB_INITIAL, i.as_bytes());
                }
                for a in any {
                    writer.add_element(filter_tag::SUB_ANY, a.as_bytes());
                }
                if let Some(f) = final_value {
                    writer.add_element(filter_tag::SUB_FINAL, f.as_bytes());
                }
                writer.end_sequence(subs);
                writer.end_sequence(seq);
            }
        }
    }

    /// Decode a filter element already split into tag and content.
    pub fn decode(filter_type: u8, content: &[u8]) -> Result<Self, LdapError> {
        match filter_type {
            filter_tag::AND | filter_tag::OR => {
                let mut reader = BerReader::new(content);
                let mut parts = Vec::new();
                while reader.has_remaining() {
                    let (t, c) = reader.read_element()?;
                    parts.push(Filter::decode(t, c)?);
                }
                Ok(if filter_type == filter_tag::AND {
                    Filter::And(parts)
                } else {
                    Filter::Or(parts)
                })
            }
            filter_tag::NOT => {
                let mut reader = BerReader::new(content);
                let (t, c) = reader.read_element()?;
                Ok(Filter::Not(Box::new(Filter::decode(t, c)?)))
            }
            filter_tag::EQUALITY
            | filter_tag::GREATER_OR_EQUAL
            | filter_tag::LESS_OR_EQUAL
            | filter_tag::APPROXIMATE => {
                let mut reader = BerReader::new(content);
                let attribute = reader.read_string()?;
                let value = reader.read_string()?;
                Ok(match filter_type {
                    filter_tag::EQUALITY => Filter::Equality { attribute, value },
                    filter_tag::GREATER_OR_EQUAL => Filter::GreaterOrEqual { attribute, value },
                    filter_tag::LESS_OR_EQUAL => Filter::LessOrEqual { attribute, value },
                    _ => Filter::Approximate { attribute, value },
                })
            }
            filter_tag::PRESENT => Ok(Filter::Present(decode_string(content)?)),
            filter_tag::SUBSTRING => {
                let mut reader = BerReader::new(content);
                let attribute = reader.read_string()?;
                let mut subs = reader.read_sequence(tag::SEQUENCE)?;
                let (mut initial, mut any, mut final_value) = (None, Vec::new(), None);
                while subs.has_remaining() {
                    let (t, c) = subs.read_element()?;
                    let s = decode_string(c)?;
                    match t {
                        filter_tag::SUB_INITIAL => initial = Some(s),
                        filter_tag::SUB_ANY => any.push(s),
                        filter_tag::SUB_FINAL => final_value = Some(s),
                        other => {
                            return Err(LdapError::Decoding(format!(
                                "invalid substring component type 0x{other:02x}"
                            )))
                        }
                    }
                }
                Ok(Filter::Substring {
                    attribute,
                    initial,
                    any,
                    final_value,
                })
            }
            other => Err(LdapError::Decoding(format!(
                "unsupported filter type 0x{other:02x}"
            ))),
        }
    }

    /// Evaluate against an entry using case-insensitive string matching.
    /// Ordering comparisons are numeric when both sides parse as integers.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|p| p.matches(entry)),
            Filter::Or(parts) => parts.iter().any(|p| p.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attribute) => {
                attribute.eq_ignore_ascii_case("objectClass") && !entry.attributes.is_empty()
                    || entry.attribute(attribute).map_or(false, |a| a.value_count() > 0)
            }
            Filter::Equality { attribute, value } => entry
                .text_values(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::Approximate { attribute, value } => {
                let wanted = squash(value);
                entry.text_values(attribute).iter().any(|v| squash(v) == wanted)
            }
            Filter::GreaterOrEqual { attribute, value } => entry
                .text_values(attribute)
                .iter()
                .any(|v| compare_values(v, value) != Ordering::Less),
            Filter::LessOrEqual { attribute, value } => entry
                .text_values(attribute)
                .iter()
                .any(|v| compare_values(v, value) != Ordering::Greater),
            Filter::Substring {
                attribute,
                initial,
                any,
                final_value,
            } => entry.text_values(attribute).iter().any(|v| {
                substring_match(v, initial.as_deref(), any, final_value.as_deref())
            }),
        }
    }
}

fn write_assertion(writer: &mut BerWriter, t: u8, attribute: &str, value: &str) {
    let seq = writer.begin_sequence(t);
    writer.add_octet_string(attribute);
    writer.add_octet_string(value);
    writer.end_sequence(seq);
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], final_value: Option<&str>) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();
    if let Some(i) = initial {
        match rest.strip_prefix(i.to_lowercase().as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match final_value {
        Some(f) => rest.ends_with(f.to_lowercase().as_str()),
        None => true,
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> LdapError {
        LdapError::Filter(format!(
            "{what} at offset {} in '{}'",
            self.pos,
            String::from_utf8_lossy(self.input)
        ))
    }

    fn expect(&mut self, b: u8) -> Result<(), LdapError> {
        if self.input.get(self.pos) == Some(&b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, LdapError> {
        self.expect(b'(')?;
        let filter = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, LdapError> {
        let mut parts = Vec::new();
        while self.input.get(self.pos) == Some(&b'(') {
            parts.push(self.parse_filter()?);
        }
        Ok(parts)
    }

    fn parse_item(&mut self) -> Result<Filter, LdapError> {
        let start = self.pos;
        while let Some(b) = self.input.get(self.pos) {
            if matches!(b, b'=' | b'~' | b'>' | b'<' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attribute = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("attribute name is not valid UTF-8"))?
            .trim()
            .to_string();
        if attribute.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        let op = match self.input.get(self.pos) {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(c @ (b'~' | b'>' | b'<')) => {
                let c = *c;
                self.pos += 1;
                self.expect(b'=')?;
                c
            }
            _ => return Err(self.error("expected filter operator")),
        };

        // Raw value runs up to the closing parenthesis; '*' splits substrings
        let mut pieces: Vec<String> = vec![String::new()];
        let mut raw_bytes: Vec<u8> = Vec::new();
        let mut stars = 0usize;
        loop {
            match self.input.get(self.pos) {
                Some(b')') | None => break,
                Some(b'(') => return Err(self.error("unescaped '(' in value")),
                Some(b'*') if op == b'=' => {
                    self.flush_piece(&mut raw_bytes, &mut pieces)?;
                    pieces.push(String::new());
                    stars += 1;
                    self.pos += 1;
                }
                Some(b'\\') => {
                    let hex = self
                        .input
                        .get(self.pos + 1..self.pos + 3)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.error("invalid escape sequence"))?;
                    raw_bytes.push(hex);
                    self.pos += 3;
                }
                Some(b) => {
                    raw_bytes.push(*b);
                    self.pos += 1;
                }
            }
        }
        self.flush_piece(&mut raw_bytes, &mut pieces)?;

        let filter = match op {
            b'~' => Filter::Approximate { attribute, value: pieces.remove(0) },
            b'>' => Filter::GreaterOrEqual { attribute, value: pieces.remove(0) },
            b'<' => Filter::LessOrEqual { attribute, value: pieces.remove(0) },
            _ if stars == 0 => Filter::Equality { attribute, value: pieces.remove(0) },
            _ if stars == 1 && pieces.iter().all(String::is_empty) => Filter::Present(attribute),
            _ => {
                let last = pieces.len() - 1;
                let initial = Some(pieces[0].clone()).filter(|s| !s.is_empty());
                let final_value = Some(pieces[last].clone()).filter(|s| !s.is_empty());
                let any = pieces[1..last]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .collect();
                Filter::Substring {
                    attribute,
                    initial,
                    any,
                    final_value,
                }
            }
        };
        Ok(filter)
    }

    fn flush_piece(&self, raw: &mut Vec<u8>, pieces: &mut [String]) -> Result<(), LdapError> {
        if raw.is_empty() {
            return Ok(());
        }
        let s = String::from_utf8(std::mem::take(raw))
            .map_err(|_| self.error("assertion value is not valid UTF-8"))?;
        if let Some(last) = pieces.last_mut() {
            last.push_str(&s);
        }
        Ok(())
    }
}

fn escape(value: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in value.chars() {
        match c {
            '*' => f.write_str("\\2a")?,
            '(' => f.write_str("\\28")?,
            ')' => f.write_str("\\29")?,
            '\\' => f.write_str("\\5c")?,
            '\0' => f.write_str("\\00")?,
            other => write!(f, "{other}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(parts) | Filter::Or(parts) => {
                f.write_str(if matches!(self, Filter::And(_)) { "(&" } else { "(|" })?;
                for p in parts {
                    write!(f, "{p}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Present(a) => write!(f, "({a}=*)"),
            Filter::Equality { attribute, value } => {
                write!(f, "({attribute}=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::Approximate { attribute, value } => {
                write!(f, "({attribute}~=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::GreaterOrEqual { attribute, value } => {
                write!(f, "({attribute}>=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::LessOrEqual { attribute, value } => {
                write!(f, "({attribute}<=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                final_value,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(i) = initial {
                    escape(i, f)?;
                }
                f.write_str("*")?;
                for a in any {
                    escape(a, f)?;
                    f.write_str("*")?;
                }
                if let Some(fv) = final_value {
                    escape(fv, f)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Entry {
        Entry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_attribute("objectClass", ["top", "person"])
            .with_attribute("uid", ["jdoe"])
            .with_attribute("cn", ["John Doe"])
            .with_attribute("uidNumber", ["1500"])
    }

    #[test]
    fn test_parse_compound_filter() {
        let f = Filter::parse("(&(objectClass=person)(|(uid=jdoe)(cn=J*Do*e))(!(uidNumber<=99)))").unwrap();
        match &f {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected filter {other:?}"),
        }
        assert!(f.matches(&person()));
    }

    #[test]
    fn test_parse_without_parentheses() {
        assert_eq!(Filter::parse("uid=jdoe").unwrap(), Filter::equality("uid", "jdoe"));
        assert_eq!(Filter::parse("(cn=*)").unwrap(), Filter::present("cn"));
    }

    #[test]
    fn test_substring_components() {
        let f = Filter::parse("(cn=Jo*n D*)").unwrap();
        assert_eq!(
            f,
            Filter::Substring {
                attribute: "cn".into(),
                initial: Some("Jo".into()),
                any: vec!["n D".into()],
                final_value: None,
            }
        );
        assert!(f.matches(&person()));
        assert!(!Filter::parse("(cn=*smith)").unwrap().matches(&person()));
    }

    #[test]
    fn test_escapes_round_trip_through_display() {
        let f = Filter::parse(r"(cn=a\2ab\28c\29)").unwrap();
        assert_eq!(f, Filter::equality("cn", "a*b(c)"));
        assert_eq!(f.to_string(), r"(cn=a\2ab\28c\29)");
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(Filter::parse("(uidNumber>=1000)").unwrap().matches(&person()));
        assert!(!Filter::parse("(uidNumber<=999)").unwrap().matches(&person()));
    }

    #[test]
    fn test_ber_form_decodes_to_same_filter() {
        let f = Filter::parse("(&(objectClass=person)(!(cn~=johndoe))(mail=*)(sn=a*b*c))").unwrap();
        let mut w = BerWriter::new();
        f.write_to(&mut w);
        let bytes = w.into_bytes();
        let mut r = BerReader::new(&bytes);
        let (t, c) = r.read_element().unwrap();
        assert_eq!(Filter::decode(t, c).unwrap(), f);
    }

    #[test]
    fn test_invalid_filters() {
        assert!(Filter::parse("").is_err());
        assert!(Filter::parse("(cn=foo").is_err());
        assert!(Filter::parse("(=foo)").is_err());
        assert!(Filter::parse(r"(cn=\zz)").is_err());
        assert!(Filter::parse("(cn=a)(sn=b)").is_err());
    }
}
