//! The connection boundary the engine executes against

use crate::correlator::ResponseAcceptor;
use crate::error::LdapError;
use crate::options::ConnectionOptions;
use crate::response::Response;
use crate::stats::ConnectionStatistics;
use crate::url::LdapUrl;
use std::sync::Arc;
use std::time::Duration;

pub trait Transport: Send + Sync {
    /// `host:port` used in errors and logs.
    fn host_port(&self) -> &str;

    fn options(&self) -> &ConnectionOptions;

    fn statistics(&self) -> &ConnectionStatistics;

    /// Issue the next message id, wrapping from `i32::MAX` back to 1.
    fn next_message_id(&self) -> i32;

    fn send_message(&self, encoded: &[u8]) -> Result<(), LdapError>;

    /// Synchronous mode only: read the next unit addressed to `message_id`,
    /// discarding units for other ids. `Ok(None)` when the read deadline expires.
    fn read_response(&self, message_id: i32) -> Result<Option<Response>, LdapError>;

    /// Read deadline for synchronous reads; `None` blocks indefinitely.
    fn set_response_timeout(&self, timeout: Option<Duration>) -> Result<(), LdapError>;

    fn register_response_acceptor(
        &self,
        message_id: i32,
        acceptor: Arc<dyn ResponseAcceptor>,
    ) -> Result<(), LdapError>;

    fn deregister_response_acceptor(&self, message_id: i32);

    fn synchronous_mode(&self) -> bool {
        self.options().use_synchronous_mode
    }

    /// Close the connection; `reason` is what the operation log records.
    fn close(&self, reason: &str);
}

/// Opens the connection used to chase a referral.
pub trait ReferralConnector: Send + Sync {
    fn referral_connection(
        &self,
        url: &LdapUrl,
        origin: &dyn Transport,
    ) -> Result<Box<dyn Transport>, LdapError>;
}
