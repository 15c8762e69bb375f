//! Minimal definite-length BER codec for the LDAP message layer
//!
//! The engine only needs a handful of primitives: booleans, integers,
//! enumerations, octet strings and (possibly nested) sequences. Everything
//! above that level (messages, filters, results) is built from these calls.

use crate::error::LdapError;

/// Universal tag numbers used by LDAP.
pub mod tag {
    pub const BOOLEAN: u8 = 0x01;
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const ENUMERATED: u8 = 0x0A;
    pub const SEQUENCE: u8 = 0x30;
    pub const SET: u8 = 0x31;
}

/// Longest length field we accept (4 octets after the 0x8N marker).
const MAX_LENGTH_OCTETS: usize = 4;

/// Position of an open sequence inside a [`BerWriter`].
#[must_use = "an open sequence must be closed with end_sequence"]
#[derive(Debug)]
pub struct SequenceMark(usize);

/// Append-only BER encoder.
#[derive(Debug, Default)]
pub struct BerWriter {
    buf: Vec<u8>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a constructed element; its length is patched in by `end_sequence`.
    pub fn begin_sequence(&mut self, tag: u8) -> SequenceMark {
        self.buf.push(tag);
        SequenceMark(self.buf.len())
    }

    pub fn end_sequence(&mut self, mark: SequenceMark) {
        let content = self.buf.split_off(mark.0);
        write_length(&mut self.buf, content.len());
        self.buf.extend_from_slice(&content);
    }

    pub fn add_element(&mut self, tag: u8, value: &[u8]) {
        self.buf.push(tag);
        write_length(&mut self.buf, value.len());
        self.buf.extend_from_slice(value);
    }

    pub fn add_octet_string(&mut self, value: impl AsRef<[u8]>) {
        self.add_element(tag::OCTET_STRING, value.as_ref());
    }

    pub fn add_integer(&mut self, value: i64) {
        self.add_element(tag::INTEGER, &encode_integer(value));
    }

    pub fn add_enumerated(&mut self, value: i64) {
        self.add_element(tag::ENUMERATED, &encode_integer(value));
    }

    pub fn add_boolean(&mut self, value: bool) {
        self.add_element(tag::BOOLEAN, &[if value { 0xFF } else { 0x00 }]);
    }

    pub fn add_null(&mut self, tag: u8) {
        self.add_element(tag, &[]);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn write_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    buf.push(0x80 | (bytes.len() - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Minimal two's-complement big-endian encoding.
pub fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

pub fn decode_integer(bytes: &[u8]) -> Result<i64, LdapError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(LdapError::Decoding(format!(
            "integer value of {} bytes cannot be decoded",
            bytes.len()
        )));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in bytes {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

pub fn decode_string(bytes: &[u8]) -> Result<String, LdapError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| LdapError::Decoding(format!("octet string is not valid UTF-8: {e}")))
}

/// Parse a BER header (tag + length) from the start of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise
/// `(tag, header_len, content_len)`.
pub fn parse_header(data: &[u8]) -> Result<Option<(u8, usize, usize)>, LdapError> {
    if data.len() < 2 {
        return Ok(None);
    }
    let tag = data[0];
    let first = data[1];
    if first & 0x80 == 0 {
        return Ok(Some((tag, 2, first as usize)));
    }
    let n = (first & 0x7F) as usize;
    if n == 0 || n > MAX_LENGTH_OCTETS {
        return Err(LdapError::Decoding(format!(
            "unsupported BER length encoding 0x{first:02x}"
        )));
    }
    if data.len() < 2 + n {
        return Ok(None);
    }
    let len = data[2..2 + n]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok(Some((tag, 2 + n, len)))
}

/// Cursor over a run of BER elements.
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read the next element and return its tag and content.
    pub fn read_element(&mut self) -> Result<(u8, &'a [u8]), LdapError> {
        let rest = &self.data[self.pos..];
        let (tag, header_len, len) = parse_header(rest)?
            .ok_or_else(|| LdapError::Decoding("truncated BER element header".into()))?;
        let end = header_len
            .checked_add(len)
            .filter(|end| *end <= rest.len())
            .ok_or_else(|| {
                LdapError::Decoding(format!(
                    "BER element declares {len} bytes but only {} remain",
                    rest.len() - header_len
                ))
            })?;
        self.pos += end;
        Ok((tag, &rest[header_len..end]))
    }

    pub fn expect_element(&mut self, expected: u8) -> Result<&'a [u8], LdapError> {
        let (tag, value) = self.read_element()?;
        if tag != expected {
            return Err(LdapError::Decoding(format!(
                "expected BER tag 0x{expected:02x} but found 0x{tag:02x}"
            )));
        }
        Ok(value)
    }

    pub fn read_sequence(&mut self, expected: u8) -> Result<BerReader<'a>, LdapError> {
        Ok(BerReader::new(self.expect_element(expected)?))
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8], LdapError> {
        self.expect_element(tag::OCTET_STRING)
    }

    pub fn read_string(&mut self) -> Result<String, LdapError> {
        decode_string(self.read_octet_string()?)
    }

    pub fn read_integer(&mut self) -> Result<i64, LdapError> {
        decode_integer(self.expect_element(tag::INTEGER)?)
    }

    pub fn read_enumerated(&mut self) -> Result<i64, LdapError> {
        decode_integer(self.expect_element(tag::ENUMERATED)?)
    }

    pub fn read_boolean(&mut self) -> Result<bool, LdapError> {
        let value = self.expect_element(tag::BOOLEAN)?;
        match value {
            [b] => Ok(*b != 0),
            _ => Err(LdapError::Decoding(format!(
                "boolean value must be one byte, found {}",
                value.len()
            ))),
        }
    }
}
