//! Referral following
//!
//! Each URL is tried in order on its own connection at `depth + 1`. Every
//! attempt yields a tagged outcome; only a hop-limit failure stops the loop
//! early.

use crate::connection::DefaultReferralConnector;
use crate::error::LdapError;
use crate::result_code::ResultCode;
use crate::transport::{ReferralConnector, Transport};
use crate::url::LdapUrl;
use tracing::{debug, warn};

/// A request that can be re-issued against a referral target.
pub trait ReferralTarget: Sized {
    type Output;

    fn derive_for_referral(&self, url: &LdapUrl) -> Self;

    fn process(&self, transport: &dyn Transport, depth: u32) -> Result<Self::Output, LdapError>;

    fn output_code(output: &Self::Output) -> ResultCode;
}

pub enum ReferralAttempt<T> {
    Resolved(T),
    /// The URL names no host.
    Skipped,
    Recoverable(LdapError),
    /// A deeper hop ran out of referral budget.
    HopLimit(T),
}

#[derive(Debug)]
pub enum ReferralOutcome<T> {
    Resolved(T),
    /// `None` when this hop itself was already at the limit.
    LimitExceeded(Option<T>),
    Exhausted,
}

/// Closes the referral connection however the hop ends.
struct HopConnection {
    transport: Box<dyn Transport>,
}

impl Drop for HopConnection {
    fn drop(&mut self) {
        self.transport.close("referral");
    }
}

fn attempt<R: ReferralTarget>(
    origin: &dyn Transport,
    raw_url: &str,
    request: &R,
    depth: u32,
) -> Result<ReferralAttempt<R::Output>, LdapError> {
    let url = match LdapUrl::parse(raw_url) {
        Ok(url) => url,
        Err(e) => return Ok(ReferralAttempt::Recoverable(e)),
    };
    if url.host.is_none() {
        return Ok(ReferralAttempt::Skipped);
    }
    let derived = request.derive_for_referral(&url);

    let connection = match &origin.options().referral_connector {
        Some(connector) => connector.referral_connection(&url, origin),
        None => DefaultReferralConnector.referral_connection(&url, origin),
    };
    let hop = match connection {
        Ok(transport) => HopConnection { transport },
        Err(e) => return Ok(ReferralAttempt::Recoverable(e)),
    };
    origin
        .options()
        .operation_logger()
        .referral_followed(origin.host_port(), raw_url, depth + 1);
    debug!(from = origin.host_port(), url = raw_url, depth = depth + 1, "following referral");

    match derived.process(hop.transport.as_ref(), depth + 1) {
        Ok(output) if R::output_code(&output) == ResultCode::REFERRAL_LIMIT_EXCEEDED => {
            Ok(ReferralAttempt::HopLimit(output))
        }
        Ok(output) => Ok(ReferralAttempt::Resolved(output)),
        Err(e) if e.result_code() == ResultCode::REFERRAL_LIMIT_EXCEEDED => Err(e),
        Err(e) => Ok(ReferralAttempt::Recoverable(e)),
    }
}

pub fn resolve<R: ReferralTarget>(
    origin: &dyn Transport,
    urls: &[String],
    request: &R,
    depth: u32,
) -> Result<ReferralOutcome<R::Output>, LdapError> {
    if depth >= origin.options().referral_hop_limit {
        return Ok(ReferralOutcome::LimitExceeded(None));
    }
    for raw_url in urls {
        match attempt(origin, raw_url, request, depth)? {
            ReferralAttempt::Resolved(output) => return Ok(ReferralOutcome::Resolved(output)),
            ReferralAttempt::HopLimit(output) => {
                return Ok(ReferralOutcome::LimitExceeded(Some(output)))
            }
            ReferralAttempt::Skipped => {
                debug!(url = raw_url.as_str(), "skipping referral URL without a host");
            }
            ReferralAttempt::Recoverable(e) => {
                warn!(url = raw_url.as_str(), error = %e, "unable to follow referral URL");
            }
        }
    }
    Ok(ReferralOutcome::Exhausted)
}
