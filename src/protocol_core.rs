//! Shared LDAPMessage framing for both the blocking client and the tokio server
//!
//! `LDAPMessage ::= SEQUENCE { messageID, protocolOp, controls [0] OPTIONAL }`.
//! Frames are delimited by their outer BER header; the helpers here turn a
//! byte stream into whole frames and frames into typed requests/responses.

use crate::ber::{self, tag, BerReader, BerWriter};
use crate::control::{decode_controls, write_controls, Control};
use crate::error::LdapError;
use crate::extended::{ExtendedRequest, ExtendedResult};
use crate::protocol::{ctx, oid, op, MAX_FRAME_SIZE};
use crate::response::Response;
use crate::result::LdapResult;
use crate::search::{SearchRequest, SearchResultEntry, SearchResultReference};
use std::io::{ErrorKind, Read};

/// A protocol op that can be placed inside an LDAPMessage.
pub trait ProtocolOp {
    fn protocol_op_type(&self) -> u8;
    fn write_to(&self, writer: &mut BerWriter);
}

pub fn validate_frame_size(size: usize) -> Result<(), LdapError> {
    if size > MAX_FRAME_SIZE {
        return Err(LdapError::Decoding(format!(
            "message too large: {size} bytes (max: {MAX_FRAME_SIZE})"
        )));
    }
    Ok(())
}

/// Number of extra length octets that follow the first two header bytes.
pub fn extra_length_octets(first_length_byte: u8) -> usize {
    if first_length_byte & 0x80 == 0 {
        0
    } else {
        (first_length_byte & 0x7F) as usize
    }
}

/// Total frame size from a complete header.
pub fn frame_total_len(header: &[u8]) -> Result<usize, LdapError> {
    let (t, header_len, content_len) = ber::parse_header(header)?
        .ok_or_else(|| LdapError::Decoding("incomplete message header".into()))?;
    if t != tag::SEQUENCE {
        return Err(LdapError::Decoding(format!(
            "expected LDAPMessage sequence but found tag 0x{t:02x}"
        )));
    }
    let total = header_len + content_len;
    validate_frame_size(total)?;
    Ok(total)
}

/// Blocking frame read. `Ok(None)` on a clean end of stream before a new frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, LdapError> {
    let mut header = vec![0u8; 2];
    match reader.read(&mut header[..1]) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::Interrupted => return read_frame(reader),
        Err(e) => return Err(e.into()),
    }
    reader.read_exact(&mut header[1..2])?;
    let extra = extra_length_octets(header[1]);
    if extra > 0 {
        header.resize(2 + extra, 0);
        reader.read_exact(&mut header[2..])?;
    }
    let total = frame_total_len(&header)?;
    let mut frame = header;
    let header_len = frame.len();
    frame.resize(total, 0);
    reader.read_exact(&mut frame[header_len..])?;
    Ok(Some(frame))
}

pub fn encode_message(message_id: i32, protocol_op: &dyn ProtocolOp, controls: &[Control]) -> Vec<u8> {
    let mut writer = BerWriter::new();
    let seq = writer.begin_sequence(tag::SEQUENCE);
    writer.add_integer(i64::from(message_id));
    protocol_op.write_to(&mut writer);
    write_controls(&mut writer, controls);
    writer.end_sequence(seq);
    writer.into_bytes()
}

/// An LDAPMessage split into its parts, op content still encoded.
#[derive(Debug)]
pub struct RawMessage<'a> {
    pub message_id: i32,
    pub op_type: u8,
    pub op_content: &'a [u8],
    pub controls: Vec<Control>,
}

pub fn parse_message(frame: &[u8]) -> Result<RawMessage<'_>, LdapError> {
    let mut outer = BerReader::new(frame);
    let mut msg = outer.read_sequence(tag::SEQUENCE)?;
    let id = msg.read_integer()?;
    let message_id = i32::try_from(id)
        .map_err(|_| LdapError::Decoding(format!("message id {id} out of range")))?;
    let (op_type, op_content) = msg.read_element()?;
    let controls = if msg.peek_tag() == Some(ctx::CONTROLS) {
        decode_controls(msg.expect_element(ctx::CONTROLS)?)?
    } else {
        Vec::new()
    };
    Ok(RawMessage {
        message_id,
        op_type,
        op_content,
        controls,
    })
}

/// Cheap look at the message id without decoding the op.
pub fn peek_message_id(frame: &[u8]) -> Result<i32, LdapError> {
    parse_message(frame).map(|m| m.message_id)
}

/// Decode a server response. An unsolicited notice of disconnection becomes
/// [`Response::ConnectionClosed`].
pub fn decode_response(frame: &[u8]) -> Result<(i32, Response), LdapError> {
    let raw = parse_message(frame)?;
    let response = match raw.op_type {
        op::SEARCH_RESULT_ENTRY => {
            Response::Entry(SearchResultEntry::decode(raw.op_content, raw.controls)?)
        }
        op::SEARCH_RESULT_REFERENCE => {
            Response::Reference(SearchResultReference::decode(raw.op_content, raw.controls)?)
        }
        op::SEARCH_RESULT_DONE
        | op::BIND_RESPONSE
        | op::MODIFY_RESPONSE
        | op::ADD_RESPONSE
        | op::DELETE_RESPONSE
        | op::MODIFY_DN_RESPONSE
        | op::COMPARE_RESPONSE => {
            let mut reader = BerReader::new(raw.op_content);
            let mut result = LdapResult::read_components(&mut reader)?;
            result.response_controls = raw.controls;
            Response::Final(result)
        }
        op::EXTENDED_RESPONSE => {
            let mut extended = ExtendedResult::decode(raw.op_content, raw.controls)?;
            if raw.message_id == 0 && extended.oid() == Some(oid::NOTICE_OF_DISCONNECTION) {
                Response::ConnectionClosed {
                    message: extended.diagnostic_message().map(str::to_string),
                }
            } else {
                extended.set_message_id(raw.message_id);
                Response::Extended(extended)
            }
        }
        other => {
            return Err(LdapError::Protocol(format!(
                "unexpected protocol op type 0x{other:02x} in response"
            )))
        }
    };
    Ok((raw.message_id, response))
}

/// Like [`decode_response`], but a unit whose envelope names an operation
/// and whose protocol op cannot be decoded becomes [`Response::Undecodable`]
/// for that message id. Only a broken envelope is an error.
pub fn decode_response_unit(frame: &[u8]) -> Result<(i32, Response), LdapError> {
    match decode_response(frame) {
        Ok(decoded) => Ok(decoded),
        Err(e) => match peek_message_id(frame) {
            Ok(message_id) if message_id > 0 => Ok((
                message_id,
                Response::Undecodable {
                    message: e.to_string(),
                },
            )),
            _ => Err(e),
        },
    }
}

/// Requests the in-memory server understands.
#[derive(Debug)]
pub enum Request {
    Search(SearchRequest),
    Extended(ExtendedRequest),
    Unbind,
    Abandon(i32),
    Unsupported(u8),
}

pub fn decode_request(frame: &[u8]) -> Result<(i32, Request), LdapError> {
    let raw = parse_message(frame)?;
    let request = match raw.op_type {
        op::SEARCH_REQUEST => Request::Search(SearchRequest::decode(raw.op_content, raw.controls)?),
        op::EXTENDED_REQUEST => {
            Request::Extended(ExtendedRequest::decode(raw.op_content, raw.controls)?)
        }
        op::UNBIND_REQUEST => Request::Unbind,
        op::ABANDON_REQUEST => {
            let id = ber::decode_integer(raw.op_content)?;
            Request::Abandon(id as i32)
        }
        other => Request::Unsupported(other),
    };
    Ok((raw.message_id, request))
}

/// UnbindRequest: `[APPLICATION 2] NULL`.
pub struct UnbindRequest;

impl ProtocolOp for UnbindRequest {
    fn protocol_op_type(&self) -> u8 {
        op::UNBIND_REQUEST
    }

    fn write_to(&self, writer: &mut BerWriter) {
        writer.add_null(op::UNBIND_REQUEST);
    }
}

/// Unsolicited notice of disconnection, always sent with message id 0.
pub fn notice_of_disconnection(result: LdapResult) -> Vec<u8> {
    let notice = ExtendedResult::new(0, result, Some(oid::NOTICE_OF_DISCONNECTION.to_string()), None);
    encode_message(0, &notice, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::result_code::ResultCode;
    use crate::search::SearchScope;
    use std::io::Cursor;

    #[test]
    fn test_validate_frame_size() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE + 1).is_err());
    }

    #[test]
    fn test_read_frames_from_stream() {
        let mut request = SearchRequest::new("dc=example", SearchScope::Base, Filter::present("objectClass"));
        request.add_control(Control::new("1.2.3", false, None));
        let mut stream = encode_message(7, &request, request.controls());
        // Long enough to need a multi-octet length
        let big = SearchRequest::new("x".repeat(300), SearchScope::Base, Filter::present("cn"));
        stream.extend(encode_message(8, &big, &[]));

        let mut cursor = Cursor::new(stream);
        let first = read_frame(&mut cursor).unwrap().unwrap();
        let (id, decoded) = decode_request(&first).unwrap();
        assert_eq!(id, 7);
        match decoded {
            Request::Search(s) => assert_eq!(s, request),
            other => panic!("unexpected request {other:?}"),
        }
        let second = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(peek_message_id(&second).unwrap(), 8);
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let frame = encode_message(1, &UnbindRequest, &[]);
        let mut cursor = Cursor::new(frame[..frame.len() - 1].to_vec());
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_notice_of_disconnection_decodes_as_closed() {
        let frame = notice_of_disconnection(
            LdapResult::new(ResultCode::UNAVAILABLE).with_diagnostic("shutting down"),
        );
        let (id, response) = decode_response(&frame).unwrap();
        assert_eq!(id, 0);
        assert_eq!(
            response,
            Response::ConnectionClosed {
                message: Some("shutting down".into())
            }
        );
    }

    struct MalformedEntry;

    impl ProtocolOp for MalformedEntry {
        fn protocol_op_type(&self) -> u8 {
            op::SEARCH_RESULT_ENTRY
        }

        fn write_to(&self, writer: &mut BerWriter) {
            let seq = writer.begin_sequence(op::SEARCH_RESULT_ENTRY);
            writer.add_integer(5);
            writer.end_sequence(seq);
        }
    }

    #[test]
    fn test_malformed_unit_is_routed_to_its_operation() {
        let frame = encode_message(3, &MalformedEntry, &[]);
        assert!(decode_response(&frame).is_err());
        let (id, response) = decode_response_unit(&frame).unwrap();
        assert_eq!(id, 3);
        assert!(matches!(response, Response::Undecodable { .. }));
        assert!(response.is_terminal());

        // Without a usable message id nothing can be routed
        let unsolicited = encode_message(0, &MalformedEntry, &[]);
        assert!(decode_response_unit(&unsolicited).is_err());
    }

    #[test]
    fn test_final_result_carries_message_controls() {
        let mut result = LdapResult::success();
        result.response_controls = vec![Control::new("1.2.840.113556.1.4.319", false, Some(vec![0x30, 0x00]))];
        let frame = encode_message(4, &crate::result::SearchResultDone(&result), &result.response_controls);
        let (id, response) = decode_response(&frame).unwrap();
        assert_eq!(id, 4);
        assert_eq!(response, Response::Final(result));
    }
}
