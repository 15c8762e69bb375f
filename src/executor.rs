//! Operation execution shared by the synchronous and asynchronous modes
//!
//! Both modes run the same classification loop; they only differ in how
//! [`PendingOperation::await_next`](crate::correlator::PendingOperation::await_next)
//! obtains the next unit.

use crate::aggregator::{apply_intermediate, referral_limit_result, Aggregator};
use crate::correlator::{self, ResponseAcceptor};
use crate::error::LdapError;
use crate::extended::{ExtendedRequest, ExtendedResult};
use crate::protocol_core::encode_message;
use crate::referral::{self, ReferralOutcome, ReferralTarget};
use crate::response::Response;
use crate::result::LdapResult;
use crate::result_code::ResultCode;
use crate::search::{
    AsyncSearchResultListener, SearchRequest, SearchResult, SearchResultReference,
};
use crate::stats::ConnectionStatistics;
use crate::transport::Transport;
use crate::url::LdapUrl;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

fn follows_referrals(request_override: Option<bool>, transport: &dyn Transport) -> bool {
    request_override.unwrap_or(transport.options().follow_referrals)
}

fn closed_result(message: &Option<String>) -> LdapResult {
    LdapResult::new(ResultCode::SERVER_DOWN).with_diagnostic(
        message
            .clone()
            .unwrap_or_else(|| "the connection to the server was closed".to_string()),
    )
}

/// Run `request` on `transport` and return the raw result, whatever its code.
/// `depth` is 1 for a top-level call.
pub fn process_search(
    transport: &dyn Transport,
    request: &SearchRequest,
    depth: u32,
) -> Result<SearchResult, LdapError> {
    let started = Instant::now();
    let mut pending = correlator::send(
        transport,
        request,
        request.controls(),
        request.response_timeout_ms(),
    )?;
    let message_id = pending.message_id();
    transport.statistics().increment_search_requests();
    let logger = transport.options().operation_logger();
    logger.request_sent(transport.host_port(), message_id, &request.to_string());
    debug!(conn = transport.host_port(), message_id, depth, "{request}");

    let following = follows_referrals(request.follow_referrals(), transport);
    let mut aggregator = Aggregator::new(request.sink());

    loop {
        let response = match pending.await_next() {
            Ok(r) => r,
            Err(e @ LdapError::Timeout { .. }) => {
                let partial = aggregator.into_result(
                    message_id,
                    LdapResult::new(ResultCode::TIMEOUT).with_diagnostic(e.to_string()),
                );
                return Err(e.with_partial(partial));
            }
            Err(e) => return Err(e),
        };

        match response {
            Response::Entry(entry) => aggregator.entry_returned(entry),
            Response::Reference(reference) if following => {
                follow_reference(transport, request, depth, reference, &mut aggregator)?
            }
            Response::Reference(reference) => aggregator.reference_returned(reference),
            Response::Final(mut result) => {
                transport.statistics().increment_search_responses(
                    aggregator.entry_count(),
                    aggregator.reference_count(),
                    started.elapsed(),
                );
                if result.referral_urls.is_empty() && result.result_code == ResultCode::REFERRAL {
                    warn!(conn = transport.host_port(), message_id, "referral result without URLs");
                }
                let intermediate = aggregator.intermediate_result_code();
                let assembled = if result.result_code == ResultCode::REFERRAL && following {
                    if depth >= transport.options().referral_hop_limit {
                        aggregator.into_result(message_id, referral_limit_result(&result))
                    } else {
                        let urls = std::mem::take(&mut result.referral_urls);
                        match referral::resolve(transport, &urls, request, depth)? {
                            ReferralOutcome::Resolved(remote)
                            | ReferralOutcome::LimitExceeded(Some(remote)) => {
                                aggregator.prepend_to(message_id, remote)
                            }
                            ReferralOutcome::LimitExceeded(None) => {
                                result.referral_urls = urls;
                                aggregator.into_result(message_id, referral_limit_result(&result))
                            }
                            ReferralOutcome::Exhausted => {
                                result.referral_urls = urls;
                                aggregator.into_result(message_id, result)
                            }
                        }
                    }
                } else {
                    aggregator.into_result(message_id, result)
                };
                let assembled = apply_intermediate(assembled, intermediate);
                logger.result_received(
                    transport.host_port(),
                    message_id,
                    assembled.result_code(),
                    assembled.entry_count(),
                    assembled.reference_count(),
                );
                return Ok(assembled);
            }
            Response::ConnectionClosed { message } => {
                let partial = aggregator.into_result(message_id, closed_result(&message));
                return Err(LdapError::ConnectionClosed {
                    host_port: transport.host_port().to_string(),
                    message,
                    partial: Some(Box::new(partial)),
                });
            }
            Response::Undecodable { message } => return Err(LdapError::Decoding(message)),
            Response::Extended(_) => {
                return Err(LdapError::Protocol(format!(
                    "unexpected extended response for search message {message_id}"
                )))
            }
        }
    }
}

fn follow_reference(
    transport: &dyn Transport,
    request: &SearchRequest,
    depth: u32,
    reference: SearchResultReference,
    aggregator: &mut Aggregator,
) -> Result<(), LdapError> {
    match referral::resolve(transport, &reference.urls, request, depth)? {
        ReferralOutcome::Resolved(remote) if remote.result_code().is_success() => {
            aggregator.merge_remote(remote)
        }
        ReferralOutcome::Resolved(remote) => {
            aggregator.reference_failed(reference, remote.result_code())
        }
        ReferralOutcome::LimitExceeded(_) => {
            aggregator.reference_failed(reference, ResultCode::REFERRAL_LIMIT_EXCEEDED)
        }
        ReferralOutcome::Exhausted => aggregator.reference_failed(reference, ResultCode::REFERRAL),
    }
    Ok(())
}

/// Run an extended operation and return the raw result.
pub fn process_extended(
    transport: &dyn Transport,
    request: &ExtendedRequest,
    depth: u32,
) -> Result<ExtendedResult, LdapError> {
    let started = Instant::now();
    let mut pending = correlator::send(
        transport,
        request,
        request.controls(),
        request.response_timeout_ms(),
    )?;
    let message_id = pending.message_id();
    transport.statistics().increment_extended_requests();
    let logger = transport.options().operation_logger();
    logger.request_sent(transport.host_port(), message_id, &request.to_string());

    let mut result = match pending.await_next()? {
        Response::Extended(r) => r,
        // Some servers answer an unrecognized request with a bare result
        Response::Final(r) => ExtendedResult::new(message_id, r, None, None),
        Response::ConnectionClosed { message } => {
            return Err(LdapError::ConnectionClosed {
                host_port: transport.host_port().to_string(),
                message,
                partial: None,
            })
        }
        Response::Undecodable { message } => return Err(LdapError::Decoding(message)),
        other => {
            return Err(LdapError::Protocol(format!(
                "unexpected {} response for extended message {message_id}",
                other.kind()
            )))
        }
    };
    result.set_message_id(message_id);
    transport
        .statistics()
        .increment_extended_responses(started.elapsed());

    if result.result_code() == ResultCode::REFERRAL
        && follows_referrals(request.follow_referrals(), transport)
    {
        let urls = result.result().referral_urls.clone();
        let limit =
            ExtendedResult::new(message_id, referral_limit_result(result.result()), None, None);
        result = if depth >= transport.options().referral_hop_limit {
            limit
        } else {
            match referral::resolve(transport, &urls, request, depth)? {
                ReferralOutcome::Resolved(r) | ReferralOutcome::LimitExceeded(Some(r)) => r,
                ReferralOutcome::LimitExceeded(None) => limit,
                ReferralOutcome::Exhausted => ExtendedResult::new(
                    message_id,
                    LdapResult::new(ResultCode::REFERRAL).with_referrals(urls),
                    None,
                    None,
                ),
            }
        };
    }
    logger.result_received(transport.host_port(), message_id, result.result_code(), 0, 0);
    Ok(result)
}

impl ReferralTarget for SearchRequest {
    type Output = SearchResult;

    fn derive_for_referral(&self, url: &LdapUrl) -> Self {
        SearchRequest::derive_for_referral(self, url)
    }

    fn process(&self, transport: &dyn Transport, depth: u32) -> Result<SearchResult, LdapError> {
        process_search(transport, self, depth)
    }

    fn output_code(output: &SearchResult) -> ResultCode {
        output.result_code()
    }
}

impl ReferralTarget for ExtendedRequest {
    type Output = ExtendedResult;

    fn derive_for_referral(&self, url: &LdapUrl) -> Self {
        ExtendedRequest::derive_for_referral(self, url)
    }

    fn process(&self, transport: &dyn Transport, depth: u32) -> Result<ExtendedResult, LdapError> {
        process_extended(transport, self, depth)
    }

    fn output_code(output: &ExtendedResult) -> ResultCode {
        output.result_code()
    }
}

#[derive(Default)]
struct AsyncCounts {
    entries: usize,
    references: usize,
    done: bool,
}

/// Acceptor for a non-blocking search. Runs on the connection reader thread;
/// no referral following and no client-side timeout apply.
struct AsyncSearchHelper {
    message_id: i32,
    listener: Arc<dyn AsyncSearchResultListener>,
    statistics: Arc<ConnectionStatistics>,
    started: Instant,
    counts: Mutex<AsyncCounts>,
}

impl AsyncSearchHelper {
    fn finish(&self, result: LdapResult) {
        let (entries, references) = {
            let mut counts = self.counts.lock();
            if counts.done {
                return;
            }
            counts.done = true;
            (counts.entries, counts.references)
        };
        self.statistics
            .increment_search_responses(entries, references, self.started.elapsed());
        self.listener.search_result(SearchResult::from_parts(
            self.message_id,
            result,
            entries,
            references,
            None,
            None,
        ));
    }
}

impl ResponseAcceptor for AsyncSearchHelper {
    fn response_received(&self, response: Response) -> Result<(), LdapError> {
        match response {
            Response::Entry(entry) => {
                self.counts.lock().entries += 1;
                self.listener.search_entry_returned(entry);
            }
            Response::Reference(reference) => {
                self.counts.lock().references += 1;
                self.listener.search_reference_returned(reference);
            }
            Response::Final(result) => self.finish(result),
            Response::ConnectionClosed { message } => self.finish(closed_result(&message)),
            Response::Undecodable { message } => self.finish(
                LdapResult::new(ResultCode::DECODING_ERROR).with_diagnostic(message),
            ),
            Response::Extended(_) => self.finish(
                LdapResult::new(ResultCode::DECODING_ERROR)
                    .with_diagnostic("unexpected extended response for search"),
            ),
        }
        Ok(())
    }
}

/// Send a search whose units are delivered to `listener` as they arrive.
/// Returns the message id immediately; the registration is dropped by the
/// connection reader once the terminal unit has been handed over.
pub fn async_search(
    transport: &dyn Transport,
    statistics: Arc<ConnectionStatistics>,
    request: &SearchRequest,
    listener: Arc<dyn AsyncSearchResultListener>,
) -> Result<i32, LdapError> {
    if transport.synchronous_mode() {
        return Err(LdapError::Unsupported(
            "asynchronous search is not available in synchronous mode".into(),
        ));
    }
    let message_id = transport.next_message_id();
    let helper = Arc::new(AsyncSearchHelper {
        message_id,
        listener,
        statistics,
        started: Instant::now(),
        counts: Mutex::new(AsyncCounts::default()),
    });
    transport.register_response_acceptor(message_id, helper)?;
    let encoded = encode_message(message_id, request, request.controls());
    if let Err(e) = transport.send_message(&encoded) {
        transport.deregister_response_acceptor(message_id);
        return Err(e);
    }
    transport.statistics().increment_search_requests();
    transport
        .options()
        .operation_logger()
        .request_sent(transport.host_port(), message_id, &request.to_string());
    debug!(conn = transport.host_port(), message_id, "async {request}");
    Ok(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::filter::Filter;
    use crate::search::{SearchResultEntry, SearchResultListener, SearchScope};
    use crate::test_support::{done, entry, reference, MockNetwork, RecordingLogger, ScriptedTransport, Step};
    use std::time::Duration;

    fn request() -> SearchRequest {
        SearchRequest::new("dc=example,dc=com", SearchScope::Subtree, Filter::present("objectClass"))
    }

    fn both_modes() -> [bool; 2] {
        [true, false]
    }

    #[test]
    fn test_entries_and_reference_without_following() {
        for sync in both_modes() {
            let t = ScriptedTransport::new("ds1:389", sync, vec![
                entry("cn=a,dc=example,dc=com"),
                entry("cn=b,dc=example,dc=com"),
                reference(&["ldap://ds2:389/ou=x,dc=example,dc=com"]),
                entry("cn=c,dc=example,dc=com"),
                done(ResultCode::SUCCESS),
            ]);
            let r = process_search(&t, &request(), 1).unwrap();
            assert_eq!(r.result_code(), ResultCode::SUCCESS);
            assert_eq!(r.entry_count(), 3);
            assert_eq!(r.reference_count(), 1);
            let dns: Vec<&str> = r.search_entries().unwrap().iter().map(|e| e.dn()).collect();
            assert_eq!(dns, ["cn=a,dc=example,dc=com", "cn=b,dc=example,dc=com", "cn=c,dc=example,dc=com"]);
            assert_eq!(r.search_references().unwrap()[0].urls, vec!["ldap://ds2:389/ou=x,dc=example,dc=com"]);
            assert_eq!(r.message_id(), 1);
            assert_eq!(t.statistics().snapshot().search_requests, 1);
            assert_eq!(t.statistics().snapshot().search_entries, 3);
        }
    }

    #[test]
    fn test_each_execution_uses_a_fresh_message_id() {
        let t = ScriptedTransport::new("ds1:389", true, vec![done(ResultCode::SUCCESS), done(ResultCode::SUCCESS)]);
        let req = request();
        assert_eq!(process_search(&t, &req, 1).unwrap().message_id(), 1);
        assert_eq!(process_search(&t, &req.duplicate_with_controls(vec![]), 1).unwrap().message_id(), 2);
    }

    #[test]
    fn test_followed_reference_adds_remote_entries() {
        for sync in both_modes() {
            let network = MockNetwork::new();
            network.script("ds2:389", vec![
                entry("cn=r1,ou=x,dc=example,dc=com"),
                entry("cn=r2,ou=x,dc=example,dc=com"),
                done(ResultCode::SUCCESS),
            ]);
            let t = ScriptedTransport::with_network("ds1:389", sync, &network, vec![
                entry("cn=a,dc=example,dc=com"),
                reference(&["ldap://ds2:389/ou=x,dc=example,dc=com"]),
                done(ResultCode::SUCCESS),
            ]);
            let mut req = request();
            req.set_follow_referrals(Some(true));
            let r = process_search(&t, &req, 1).unwrap();
            assert_eq!(r.result_code(), ResultCode::SUCCESS);
            assert_eq!(r.entry_count(), 3);
            assert_eq!(r.reference_count(), 0);
            assert_eq!(r.search_entries().unwrap().len(), 3);
            assert_eq!(network.opened(), 1);
            assert_eq!(network.closed(), 1);
            assert!(t.registered_ids().is_empty());
            assert!(network.registered_ids().is_empty());
            let sent = network.sent_requests("ds2:389");
            assert_eq!(sent[0].base_dn(), "ou=x,dc=example,dc=com");
        }
    }

    #[test]
    fn test_unreachable_reference_downgrades_success() {
        let network = MockNetwork::new();
        network.script("ds3:389", vec![done(ResultCode::NO_SUCH_OBJECT)]);
        let t = ScriptedTransport::with_network("ds1:389", false, &network, vec![
            reference(&["ldap:///ou=nohost,dc=example,dc=com", "ldap://down:389/ou=y,dc=example,dc=com"]),
            reference(&["ldap://ds3:389/ou=z,dc=example,dc=com"]),
            done(ResultCode::SUCCESS),
        ]);
        let mut options = t.options().clone();
        options.follow_referrals = true;
        let t = t.with_options(options);
        let r = process_search(&t, &request(), 1).unwrap();
        // First failure (every URL unusable) wins over the later one
        assert_eq!(r.result_code(), ResultCode::REFERRAL);
        assert_eq!(r.reference_count(), 2);
        assert_eq!(r.search_references().unwrap().len(), 2);
    }

    #[test]
    fn test_final_referral_followed() {
        let network = MockNetwork::new();
        network.script("ds2:389", vec![entry("cn=moved,dc=example,dc=com"), done(ResultCode::SUCCESS)]);
        let t = ScriptedTransport::with_network("ds1:389", true, &network, vec![
            entry("cn=first,dc=example,dc=com"),
            Step::Respond(Response::Final(
                LdapResult::new(ResultCode::REFERRAL).with_referrals(["ldap://ds2:389/dc=example,dc=com"]),
            )),
        ]);
        let mut req = request();
        req.set_follow_referrals(Some(true));
        let r = process_search(&t, &req, 1).unwrap();
        assert_eq!(r.result_code(), ResultCode::SUCCESS);
        assert_eq!(r.entry_count(), 2);
        assert_eq!(r.search_entries().unwrap()[0].dn(), "cn=first,dc=example,dc=com");
        assert_eq!(r.message_id(), 1);
    }

    #[test]
    fn test_unresolvable_final_referral_returns_original() {
        let network = MockNetwork::new();
        let t = ScriptedTransport::with_network("ds1:389", true, &network, vec![Step::Respond(Response::Final(
            LdapResult::new(ResultCode::REFERRAL)
                .with_diagnostic("go elsewhere")
                .with_referrals(["ldap://nowhere:389/dc=example,dc=com"]),
        ))]);
        let mut req = request();
        req.set_follow_referrals(Some(true));
        let r = process_search(&t, &req, 1).unwrap();
        assert_eq!(r.result_code(), ResultCode::REFERRAL);
        assert_eq!(r.diagnostic_message(), Some("go elsewhere"));
        assert_eq!(r.referral_urls(), ["ldap://nowhere:389/dc=example,dc=com"]);
        assert!(matches!(r.into_result(), Err(LdapError::ReferralUnresolvable(_))));
    }

    #[test]
    fn test_hop_limit_keeps_counts_of_every_hop() {
        for sync in both_modes() {
            let network = MockNetwork::new();
            for hop in 2..=6 {
                network.script(&format!("ds{hop}:389"), vec![
                    entry(&format!("cn=hop{hop},dc=example,dc=com")),
                    Step::Respond(Response::Final(
                        LdapResult::new(ResultCode::REFERRAL)
                            .with_referrals([format!("ldap://ds{}:389/dc=example,dc=com", hop + 1)]),
                    )),
                ]);
            }
            let t = ScriptedTransport::with_network("ds1:389", sync, &network, vec![
                entry("cn=hop1,dc=example,dc=com"),
                Step::Respond(Response::Final(
                    LdapResult::new(ResultCode::REFERRAL).with_referrals(["ldap://ds2:389/dc=example,dc=com"]),
                )),
            ]);
            let mut req = request();
            req.set_follow_referrals(Some(true));
            let r = process_search(&t, &req, 1).unwrap();
            assert_eq!(r.result_code(), ResultCode::REFERRAL_LIMIT_EXCEEDED, "sync={sync}");
            assert_eq!(r.diagnostic_message(), Some("too many referrals"));
            assert_eq!(r.entry_count(), 5);
            assert_eq!(network.opened(), 4);
            assert_eq!(network.closed(), 4);
            assert!(t.registered_ids().is_empty());
            assert!(network.registered_ids().is_empty());
            assert!(matches!(r.into_result(), Err(LdapError::ReferralLimitExceeded(_))));
        }
    }

    #[test]
    fn test_referral_hop_close_is_logged_once() {
        for sync in both_modes() {
            let logger = Arc::new(RecordingLogger::default());
            let network = MockNetwork::new();
            network.script("ds2:389", vec![entry("cn=r1,ou=x,dc=example,dc=com"), done(ResultCode::SUCCESS)]);
            let t = ScriptedTransport::with_network("ds1:389", sync, &network, vec![
                reference(&["ldap://ds2:389/ou=x,dc=example,dc=com"]),
                done(ResultCode::SUCCESS),
            ]);
            let mut options = t.options().clone();
            options.follow_referrals = true;
            options.logger = Some(logger.clone());
            let t = t.with_options(options);
            let r = process_search(&t, &request(), 1).unwrap();
            assert_eq!(r.entry_count(), 1);
            assert_eq!(logger.closes(), vec![("ds2:389".to_string(), "referral".to_string())]);
        }
    }

    #[test]
    fn test_timeout_reports_partial_counts() {
        for sync in both_modes() {
            let t = ScriptedTransport::new("ds1:389", sync, vec![
                entry("cn=a,dc=example,dc=com"),
                entry("cn=b,dc=example,dc=com"),
                Step::Hang,
            ]);
            let mut req = request();
            req.set_response_timeout_ms(Some(50));
            let err = process_search(&t, &req, 1).unwrap_err();
            assert!(matches!(err, LdapError::Timeout { timeout_ms: 50, .. }), "{err}");
            assert_eq!(err.result_code(), ResultCode::TIMEOUT);
            assert_eq!(err.partial_result().map(|p| p.entry_count()), Some(2));
            assert!(t.registered_ids().is_empty());
        }
    }

    #[test]
    fn test_connection_closed_mid_search() {
        for sync in both_modes() {
            let t = ScriptedTransport::new("ds1:389", sync, vec![
                entry("cn=a,dc=example,dc=com"),
                Step::Respond(Response::ConnectionClosed { message: Some("bye".into()) }),
            ]);
            let err = process_search(&t, &request(), 1).unwrap_err();
            assert_eq!(err.result_code(), ResultCode::SERVER_DOWN);
            let partial = err.partial_result().unwrap();
            assert_eq!(partial.entry_count(), 1);
            assert_eq!(partial.diagnostic_message(), Some("bye"));
            assert!(t.registered_ids().is_empty());
        }
    }

    #[derive(Default)]
    struct Collecting {
        entries: Mutex<Vec<SearchResultEntry>>,
        references: Mutex<Vec<SearchResultReference>>,
        result: Mutex<Option<SearchResult>>,
    }

    impl SearchResultListener for Collecting {
        fn search_entry_returned(&self, entry: SearchResultEntry) {
            self.entries.lock().push(entry);
        }
        fn search_reference_returned(&self, reference: SearchResultReference) {
            self.references.lock().push(reference);
        }
    }

    impl AsyncSearchResultListener for Collecting {
        fn search_entry_returned(&self, entry: SearchResultEntry) {
            self.entries.lock().push(entry);
        }
        fn search_reference_returned(&self, reference: SearchResultReference) {
            self.references.lock().push(reference);
        }
        fn search_result(&self, result: SearchResult) {
            *self.result.lock() = Some(result);
        }
    }

    #[test]
    fn test_streaming_listener_gets_units_in_order() {
        let t = ScriptedTransport::new("ds1:389", false, vec![
            entry("cn=a,dc=example,dc=com"),
            reference(&["ldap://ds2:389/"]),
            entry("cn=b,dc=example,dc=com"),
            done(ResultCode::SUCCESS),
        ]);
        let listener = Arc::new(Collecting::default());
        let as_listener: Arc<dyn SearchResultListener> = listener.clone();
        let req = SearchRequest::with_listener(as_listener, "dc=example,dc=com", SearchScope::Subtree, Filter::present("cn"));
        let r = process_search(&t, &req, 1).unwrap();
        assert_eq!((r.entry_count(), r.reference_count()), (2, 1));
        assert!(r.search_entries().is_none());
        let dns: Vec<String> = listener.entries.lock().iter().map(|e| e.entry.dn.clone()).collect();
        assert_eq!(dns, ["cn=a,dc=example,dc=com", "cn=b,dc=example,dc=com"]);
        assert_eq!(listener.references.lock().len(), 1);
    }

    #[test]
    fn test_async_search_delivers_final_result() {
        let t = ScriptedTransport::new("ds1:389", false, vec![
            entry("cn=a,dc=example,dc=com"),
            done(ResultCode::SUCCESS),
        ]);
        let listener = Arc::new(Collecting::default());
        let stats = Arc::new(ConnectionStatistics::new());
        let id = async_search(&t, Arc::clone(&stats), &request(), listener.clone()).unwrap();
        assert_eq!(id, 1);
        for _ in 0..100 {
            if listener.result.lock().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let result = listener.result.lock().clone().unwrap();
        assert_eq!(result.message_id(), 1);
        assert_eq!(result.entry_count(), 1);
        assert_eq!(stats.snapshot().search_responses, 1);
    }

    #[test]
    fn test_extended_operation_result() {
        let t = ScriptedTransport::new("ds1:389", true, vec![Step::Respond(Response::Extended(ExtendedResult::new(
            0,
            LdapResult::success(),
            None,
            Some(b"dn:cn=admin".to_vec()),
        )))]);
        let r = process_extended(&t, &ExtendedRequest::who_am_i(), 1).unwrap();
        assert_eq!(r.message_id(), 1);
        assert_eq!(r.authorization_id().as_deref(), Some("dn:cn=admin"));
        assert_eq!(t.statistics().snapshot().extended_responses, 1);
    }

    #[test]
    fn test_extended_referral_exhausted_is_generic_failure() {
        let network = MockNetwork::new();
        let t = ScriptedTransport::with_network("ds1:389", true, &network, vec![Step::Respond(Response::Extended(
            ExtendedResult::new(
                0,
                LdapResult::new(ResultCode::REFERRAL)
                    .with_diagnostic("elsewhere")
                    .with_referrals(["ldap://gone:389/"]),
                Some("1.2.3".into()),
                None,
            ),
        ))]);
        let mut req = ExtendedRequest::new("1.2.3", None);
        req.set_follow_referrals(Some(true));
        let r = process_extended(&t, &req, 1).unwrap();
        assert_eq!(r.result_code(), ResultCode::REFERRAL);
        assert_eq!(r.diagnostic_message(), None);
        assert_eq!(r.result().referral_urls, vec!["ldap://gone:389/"]);
        assert!(r.into_result().is_err());
    }

    #[test]
    fn test_entry_helper_builds_entry() {
        match entry("cn=a") {
            Step::Respond(Response::Entry(e)) => assert_eq!(e.entry, Entry::new("cn=a")),
            _ => panic!("unexpected step"),
        }
    }
}
