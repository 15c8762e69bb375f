//! Extended operations: the single-response counterpart of search

use crate::ber::{BerReader, BerWriter};
use crate::control::Control;
use crate::error::LdapError;
use crate::protocol::{ctx, oid, op};
use crate::protocol_core::ProtocolOp;
use crate::result::LdapResult;
use crate::result_code::ResultCode;
use crate::url::LdapUrl;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedRequest {
    oid: String,
    value: Option<Vec<u8>>,
    controls: Vec<Control>,
    follow_referrals: Option<bool>,
    response_timeout_ms: Option<u64>,
}

impl ExtendedRequest {
    pub fn new(oid: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            value,
            controls: Vec::new(),
            follow_referrals: None,
            response_timeout_ms: None,
        }
    }

    /// "Who am I?" (RFC 4532).
    pub fn who_am_i() -> Self {
        Self::new(oid::WHO_AM_I, None)
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn add_control(&mut self, control: Control) {
        self.controls.push(control);
    }

    pub fn follow_referrals(&self) -> Option<bool> {
        self.follow_referrals
    }

    pub fn set_follow_referrals(&mut self, follow: Option<bool>) {
        self.follow_referrals = follow;
    }

    pub fn response_timeout_ms(&self) -> Option<u64> {
        self.response_timeout_ms
    }

    pub fn set_response_timeout_ms(&mut self, timeout_ms: Option<u64>) {
        self.response_timeout_ms = timeout_ms;
    }

    /// Extended requests carry no DN, so a referral target reuses the request as-is.
    pub fn derive_for_referral(&self, _url: &LdapUrl) -> Self {
        self.clone()
    }

    pub fn decode(content: &[u8], controls: Vec<Control>) -> Result<Self, LdapError> {
        let mut reader = BerReader::new(content);
        let oid = crate::ber::decode_string(reader.expect_element(ctx::EXTENDED_REQUEST_OID)?)?;
        let value = if reader.peek_tag() == Some(ctx::EXTENDED_REQUEST_VALUE) {
            Some(reader.expect_element(ctx::EXTENDED_REQUEST_VALUE)?.to_vec())
        } else {
            None
        };
        Ok(Self {
            oid,
            value,
            controls,
            follow_referrals: None,
            response_timeout_ms: None,
        })
    }
}

impl ProtocolOp for ExtendedRequest {
    fn protocol_op_type(&self) -> u8 {
        op::EXTENDED_REQUEST
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(op::EXTENDED_REQUEST);
        writer.add_element(ctx::EXTENDED_REQUEST_OID, self.oid.as_bytes());
        if let Some(v) = &self.value {
            writer.add_element(ctx::EXTENDED_REQUEST_VALUE, v);
        }
        writer.end_sequence(seq);
    }
}

impl fmt::Display for ExtendedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtendedRequest(oid='{}'", self.oid)?;
        if let Some(v) = &self.value {
            write!(f, ", valueLength={}", v.len())?;
        }
        f.write_str(")")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedResult {
    message_id: i32,
    result: LdapResult,
    oid: Option<String>,
    value: Option<Vec<u8>>,
}

impl ExtendedResult {
    pub fn new(message_id: i32, result: LdapResult, oid: Option<String>, value: Option<Vec<u8>>) -> Self {
        Self {
            message_id,
            result,
            oid,
            value,
        }
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub(crate) fn set_message_id(&mut self, message_id: i32) {
        self.message_id = message_id;
    }

    pub fn result(&self) -> &LdapResult {
        &self.result
    }

    pub fn result_code(&self) -> ResultCode {
        self.result.result_code
    }

    pub fn diagnostic_message(&self) -> Option<&str> {
        self.result.diagnostic_message.as_deref()
    }

    pub fn oid(&self) -> Option<&str> {
        self.oid.as_deref()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Authorization identity from a "Who am I?" response; empty means anonymous.
    pub fn authorization_id(&self) -> Option<String> {
        self.value
            .as_ref()
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn into_result(self) -> Result<ExtendedResult, LdapError> {
        if self.result.result_code.is_success() {
            Ok(self)
        } else {
            Err(LdapError::ExtendedOperation(Box::new(self)))
        }
    }

    pub fn decode(content: &[u8], controls: Vec<Control>) -> Result<Self, LdapError> {
        let mut reader = BerReader::new(content);
        let mut result = LdapResult::read_components(&mut reader)?;
        result.response_controls = controls;
        let mut oid = None;
        let mut value = None;
        while reader.has_remaining() {
            let (t, c) = reader.read_element()?;
            match t {
                ctx::EXTENDED_RESPONSE_OID => oid = Some(crate::ber::decode_string(c)?),
                ctx::EXTENDED_RESPONSE_VALUE => value = Some(c.to_vec()),
                other => {
                    return Err(LdapError::Decoding(format!(
                        "unexpected element 0x{other:02x} in extended response"
                    )))
                }
            }
        }
        Ok(Self {
            message_id: 0,
            result,
            oid,
            value,
        })
    }
}

impl ProtocolOp for ExtendedResult {
    fn protocol_op_type(&self) -> u8 {
        op::EXTENDED_RESPONSE
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(op::EXTENDED_RESPONSE);
        self.result.write_components(writer);
        if let Some(oid) = &self.oid {
            writer.add_element(ctx::EXTENDED_RESPONSE_OID, oid.as_bytes());
        }
        if let Some(v) = &self.value {
            writer.add_element(ctx::EXTENDED_RESPONSE_VALUE, v);
        }
        writer.end_sequence(seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_decodes_to_same_fields() {
        let req = ExtendedRequest::new("1.2.3.4.5", Some(vec![1, 2, 3]));
        let mut w = BerWriter::new();
        req.write_to(&mut w);
        let bytes = w.into_bytes();
        let mut r = BerReader::new(&bytes);
        let content = r.expect_element(op::EXTENDED_REQUEST).unwrap();
        assert_eq!(ExtendedRequest::decode(content, vec![]).unwrap(), req);
    }

    #[test]
    fn test_failed_result_exposes_oid_and_value() {
        let result = ExtendedResult::new(
            9,
            LdapResult::new(ResultCode::UNWILLING_TO_PERFORM).with_diagnostic("no"),
            Some("1.2.3".into()),
            Some(b"payload".to_vec()),
        );
        let err = result.into_result().unwrap_err();
        assert_eq!(err.result_code(), ResultCode::UNWILLING_TO_PERFORM);
        assert_eq!(err.response_oid(), Some("1.2.3"));
        assert_eq!(err.response_value(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_response_decode() {
        let result = ExtendedResult::new(0, LdapResult::success(), None, Some(b"dn:cn=admin".to_vec()));
        let mut w = BerWriter::new();
        result.write_to(&mut w);
        let bytes = w.into_bytes();
        let mut r = BerReader::new(&bytes);
        let content = r.expect_element(op::EXTENDED_RESPONSE).unwrap();
        let decoded = ExtendedResult::decode(content, vec![]).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.authorization_id().as_deref(), Some("dn:cn=admin"));
    }
}
