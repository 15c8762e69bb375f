//! Error type for every engine path

use crate::extended::ExtendedResult;
use crate::result_code::ResultCode;
use crate::search::SearchResult;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LdapError {
    /// Client-side wait expired; distinct from a server-side time limit.
    #[error("no response received from {host_port} within {timeout_ms} ms")]
    Timeout {
        host_port: String,
        timeout_ms: u64,
        partial: Option<Box<SearchResult>>,
    },

    #[error("interrupted while waiting for a response from {host_port}")]
    LocalInterrupt { host_port: String },

    #[error("connection to {host_port} closed{}", suffix(.message))]
    ConnectionClosed {
        host_port: String,
        message: Option<String>,
        partial: Option<Box<SearchResult>>,
    },

    #[error("referral limit exceeded: {}", .0.result())]
    ReferralLimitExceeded(Box<SearchResult>),

    #[error("unable to follow any referral URL: {}", .0.result())]
    ReferralUnresolvable(Box<SearchResult>),

    #[error("extended operation failed: {}", .0.result())]
    ExtendedOperation(Box<ExtendedResult>),

    #[error("search failed: {}", .0.result())]
    Search(Box<SearchResult>),

    #[error("unable to connect to {host_port}: {source}")]
    Connect {
        host_port: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid filter: {0}")]
    Filter(String),

    #[error("invalid LDAP URL '{url}': {reason}")]
    Url { url: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not supported: {0}")]
    Unsupported(String),
}

fn suffix(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl LdapError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            LdapError::Timeout { .. } => ResultCode::TIMEOUT,
            LdapError::LocalInterrupt { .. } => ResultCode::LOCAL_ERROR,
            LdapError::ConnectionClosed { .. } | LdapError::Io(_) => ResultCode::SERVER_DOWN,
            LdapError::ReferralLimitExceeded(r)
            | LdapError::ReferralUnresolvable(r)
            | LdapError::Search(r) => r.result_code(),
            LdapError::ExtendedOperation(r) => r.result_code(),
            LdapError::Connect { .. } => ResultCode::CONNECT_ERROR,
            LdapError::Decoding(_) => ResultCode::DECODING_ERROR,
            LdapError::Encoding(_) => ResultCode::ENCODING_ERROR,
            LdapError::Filter(_) => ResultCode::FILTER_ERROR,
            LdapError::Url { .. } => ResultCode::PARAM_ERROR,
            LdapError::Protocol(_) => ResultCode::PROTOCOL_ERROR,
            LdapError::Unsupported(_) => ResultCode::NOT_SUPPORTED,
        }
    }

    /// Whatever a search had accumulated before it failed.
    pub fn partial_result(&self) -> Option<&SearchResult> {
        match self {
            LdapError::Timeout { partial, .. } | LdapError::ConnectionClosed { partial, .. } => {
                partial.as_deref()
            }
            LdapError::ReferralLimitExceeded(r)
            | LdapError::ReferralUnresolvable(r)
            | LdapError::Search(r) => Some(r),
            _ => None,
        }
    }

    pub fn response_oid(&self) -> Option<&str> {
        match self {
            LdapError::ExtendedOperation(r) => r.oid(),
            _ => None,
        }
    }

    pub fn response_value(&self) -> Option<&[u8]> {
        match self {
            LdapError::ExtendedOperation(r) => r.value(),
            _ => None,
        }
    }

    /// Attach a partial result to a wait failure raised below the aggregator.
    pub(crate) fn with_partial(self, partial: SearchResult) -> Self {
        match self {
            LdapError::Timeout {
                host_port,
                timeout_ms,
                ..
            } => LdapError::Timeout {
                host_port,
                timeout_ms,
                partial: Some(Box::new(partial)),
            },
            LdapError::ConnectionClosed {
                host_port, message, ..
            } => LdapError::ConnectionClosed {
                host_port,
                message,
                partial: Some(Box::new(partial)),
            },
            other => other,
        }
    }
}
