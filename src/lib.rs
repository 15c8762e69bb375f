//! ldapflow
//!
//! LDAP operation execution: request/response correlation on a shared
//! connection, synchronous and asynchronous execution, result aggregation,
//! referral following and response timeouts. Search is the canonical
//! multi-response operation and extended operations the single-response one.
//! An in-memory directory server is included for tests and local use.

pub mod aggregator;
pub mod ber;
pub mod cli;
pub mod connection;
pub mod control;
pub mod correlator;
pub mod entry;
pub mod error;
pub mod executor;
pub mod extended;
pub mod filter;
pub mod fixture;
pub mod interceptor;
pub mod logger;
pub mod options;
pub mod protocol;
pub mod protocol_core;
pub mod referral;
pub mod response;
pub mod result;
pub mod result_code;
pub mod search;
pub mod server;
pub mod stats;
pub mod transport;
pub mod url;

#[cfg(test)]
mod test_support;

pub use connection::LdapConnection;
pub use error::LdapError;
pub use extended::{ExtendedRequest, ExtendedResult};
pub use filter::Filter;
pub use options::ConnectionOptions;
pub use result::LdapResult;
pub use result_code::ResultCode;
pub use search::{SearchRequest, SearchResult, SearchScope};
pub use transport::Transport;
