//! Request and response controls, carried as opaque values

use crate::ber::{tag, BerReader, BerWriter};
use crate::error::LdapError;
use crate::protocol::ctx;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Control {
    oid: String,
    critical: bool,
    value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(tag::SEQUENCE);
        writer.add_octet_string(&self.oid);
        if self.critical {
            writer.add_boolean(true);
        }
        if let Some(value) = &self.value {
            writer.add_octet_string(value);
        }
        writer.end_sequence(seq);
    }

    fn decode(mut reader: BerReader<'_>) -> Result<Self, LdapError> {
        let oid = reader.read_string()?;
        let mut critical = false;
        let mut value = None;
        while let Some(t) = reader.peek_tag() {
            match t {
                tag::BOOLEAN => critical = reader.read_boolean()?,
                tag::OCTET_STRING => value = Some(reader.read_octet_string()?.to_vec()),
                other => {
                    return Err(LdapError::Decoding(format!(
                        "unexpected element 0x{other:02x} in control {oid}"
                    )))
                }
            }
        }
        Ok(Self { oid, critical, value })
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Control(oid={}, critical={}", self.oid, self.critical)?;
        if let Some(v) = &self.value {
            write!(f, ", valueLength={}", v.len())?;
        }
        write!(f, ")")
    }
}

/// Write the `[0] Controls` element of an LDAPMessage; nothing when empty.
pub fn write_controls(writer: &mut BerWriter, controls: &[Control]) {
    if controls.is_empty() {
        return;
    }
    let seq = writer.begin_sequence(ctx::CONTROLS);
    for control in controls {
        control.write_to(writer);
    }
    writer.end_sequence(seq);
}

/// Decode the content of a `[0] Controls` element.
pub fn decode_controls(content: &[u8]) -> Result<Vec<Control>, LdapError> {
    let mut reader = BerReader::new(content);
    let mut controls = Vec::new();
    while reader.has_remaining() {
        controls.push(Control::decode(reader.read_sequence(tag::SEQUENCE)?)?);
    }
    Ok(controls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_keep_order_and_fields() {
        let controls = vec![
            Control::new("1.2.840.113556.1.4.319", true, Some(vec![0x30, 0x00])),
            Control::new("2.16.840.1.113730.3.4.2", false, None),
        ];
        let mut w = BerWriter::new();
        write_controls(&mut w, &controls);
        let bytes = w.into_bytes();
        let mut r = BerReader::new(&bytes);
        let content = r.expect_element(ctx::CONTROLS).unwrap();
        assert_eq!(decode_controls(content).unwrap(), controls);
    }

    #[test]
    fn test_empty_controls_write_nothing() {
        let mut w = BerWriter::new();
        write_controls(&mut w, &[]);
        assert!(w.as_bytes().is_empty());
    }
}
