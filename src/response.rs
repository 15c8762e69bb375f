//! Classified inbound response units

use crate::extended::ExtendedResult;
use crate::result::LdapResult;
use crate::search::{SearchResultEntry, SearchResultReference};

/// One unit read from the connection for a given message id.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Entry(SearchResultEntry),
    Reference(SearchResultReference),
    /// Terminal result of a search (or any non-extended operation).
    Final(LdapResult),
    Extended(ExtendedResult),
    /// Sentinel delivered when the connection goes away.
    ConnectionClosed { message: Option<String> },
    /// A unit for this operation arrived but could not be decoded. Ends the
    /// operation; the connection stays usable.
    Undecodable { message: String },
}

impl Response {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Entry(_) | Response::Reference(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Entry(_) => "entry",
            Response::Reference(_) => "reference",
            Response::Final(_) => "final",
            Response::Extended(_) => "extended",
            Response::ConnectionClosed { .. } => "connection-closed",
            Response::Undecodable { .. } => "undecodable",
        }
    }
}
