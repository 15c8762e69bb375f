//! The `LDAPResult` components shared by every final response

use crate::ber::{BerReader, BerWriter};
use crate::control::Control;
use crate::error::LdapError;
use crate::protocol::{ctx, op};
use crate::protocol_core::ProtocolOp;
use crate::result_code::ResultCode;
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LdapResult {
    pub result_code: ResultCode,
    pub matched_dn: Option<String>,
    pub diagnostic_message: Option<String>,
    pub referral_urls: Vec<String>,
    pub response_controls: Vec<Control>,
}

impl LdapResult {
    pub fn new(result_code: ResultCode) -> Self {
        Self {
            result_code,
            ..Self::default()
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS)
    }

    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.diagnostic_message = Some(message.into());
        self
    }

    pub fn with_matched_dn(mut self, dn: impl Into<String>) -> Self {
        self.matched_dn = Some(dn.into());
        self
    }

    pub fn with_referrals<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.referral_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Write the result components into an already-open protocol op sequence.
    pub fn write_components(&self, writer: &mut BerWriter) {
        writer.add_enumerated(i64::from(self.result_code.int_value()));
        writer.add_octet_string(self.matched_dn.as_deref().unwrap_or(""));
        writer.add_octet_string(self.diagnostic_message.as_deref().unwrap_or(""));
        if !self.referral_urls.is_empty() {
            let seq = writer.begin_sequence(ctx::REFERRAL);
            for url in &self.referral_urls {
                writer.add_octet_string(url);
            }
            writer.end_sequence(seq);
        }
    }

    /// Read the result components; trailing op-specific elements stay in `reader`.
    pub fn read_components(reader: &mut BerReader<'_>) -> Result<Self, LdapError> {
        let code = reader.read_enumerated()?;
        let code = u32::try_from(code)
            .map_err(|_| LdapError::Decoding(format!("negative result code {code}")))?;
        let matched_dn = non_empty(reader.read_string()?);
        let diagnostic_message = non_empty(reader.read_string()?);
        let mut referral_urls = Vec::new();
        if reader.peek_tag() == Some(ctx::REFERRAL) {
            let mut urls = reader.read_sequence(ctx::REFERRAL)?;
            while urls.has_remaining() {
                referral_urls.push(urls.read_string()?);
            }
        }
        Ok(Self {
            result_code: ResultCode::new(code),
            matched_dn,
            diagnostic_message,
            referral_urls,
            response_controls: Vec::new(),
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resultCode={}", self.result_code)?;
        if let Some(m) = &self.diagnostic_message {
            write!(f, ", diagnosticMessage='{m}'")?;
        }
        if let Some(dn) = &self.matched_dn {
            write!(f, ", matchedDN='{dn}'")?;
        }
        if !self.referral_urls.is_empty() {
            write!(f, ", referralURLs={{{}}}", self.referral_urls.join(", "))?;
        }
        Ok(())
    }
}

/// Server-side encoding of a `SearchResultDone`.
pub struct SearchResultDone<'a>(pub &'a LdapResult);

impl ProtocolOp for SearchResultDone<'_> {
    fn protocol_op_type(&self) -> u8 {
        op::SEARCH_RESULT_DONE
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(op::SEARCH_RESULT_DONE);
        self.0.write_components(writer);
        writer.end_sequence(seq);
    }
}
