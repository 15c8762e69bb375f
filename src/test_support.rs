//! Socket-free transport used by the unit tests

use crate::correlator::{self, AcceptorRegistry, ResponseAcceptor};
use crate::entry::Entry;
use crate::error::LdapError;
use crate::logger::OperationLogger;
use crate::options::ConnectionOptions;
use crate::protocol_core::{decode_request, peek_message_id, Request};
use crate::response::Response;
use crate::result::LdapResult;
use crate::result_code::ResultCode;
use crate::search::{SearchRequest, SearchResultEntry, SearchResultReference};
use crate::stats::ConnectionStatistics;
use crate::transport::{ReferralConnector, Transport};
use crate::url::LdapUrl;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub enum Step {
    Respond(Response),
    /// Nothing more arrives.
    Hang,
}

pub fn entry(dn: &str) -> Step {
    Step::Respond(Response::Entry(SearchResultEntry::new(Entry::new(dn))))
}

pub fn reference(urls: &[&str]) -> Step {
    Step::Respond(Response::Reference(SearchResultReference::new(urls.iter().copied())))
}

pub fn done(code: ResultCode) -> Step {
    Step::Respond(Response::Final(LdapResult::new(code)))
}

type SentLog = Arc<Mutex<Vec<Vec<u8>>>>;

pub struct ScriptedTransport {
    host_port: String,
    options: ConnectionOptions,
    stats: ConnectionStatistics,
    next_id: AtomicI32,
    steps: Arc<Mutex<VecDeque<Step>>>,
    registry: Arc<AcceptorRegistry>,
    timeout: Mutex<Option<Duration>>,
    sent: SentLog,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(host_port: &str, sync: bool, steps: Vec<Step>) -> Self {
        let options = ConnectionOptions {
            use_synchronous_mode: sync,
            ..ConnectionOptions::default()
        };
        Self::build(host_port, options, steps, Arc::default(), Arc::default())
    }

    pub fn with_network(host_port: &str, sync: bool, network: &MockNetwork, steps: Vec<Step>) -> Self {
        let options = ConnectionOptions {
            use_synchronous_mode: sync,
            referral_connector: Some(Arc::new(network.clone())),
            ..ConnectionOptions::default()
        };
        Self::build(host_port, options, steps, Arc::default(), Arc::default())
    }

    fn build(
        host_port: &str,
        options: ConnectionOptions,
        steps: Vec<Step>,
        sent: SentLog,
        closed: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            host_port: host_port.to_string(),
            options,
            stats: ConnectionStatistics::new(),
            next_id: AtomicI32::new(1),
            steps: Arc::new(Mutex::new(steps.into())),
            registry: Arc::new(AcceptorRegistry::new(host_port)),
            timeout: Mutex::new(None),
            sent,
            closed,
        }
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registered_ids(&self) -> Vec<i32> {
        self.registry.ids()
    }

    /// Push the next operation's units to its acceptor from another thread,
    /// the way a connection reader would.
    fn spawn_pusher(&self, message_id: i32) {
        let mut batch = Vec::new();
        {
            let mut steps = self.steps.lock();
            while let Some(step) = steps.pop_front() {
                match step {
                    Step::Hang => break,
                    Step::Respond(r) => {
                        let terminal = r.is_terminal();
                        batch.push(r);
                        if terminal {
                            break;
                        }
                    }
                }
            }
        }
        let registry = Arc::clone(&self.registry);
        thread::spawn(move || {
            for response in batch {
                let terminal = response.is_terminal();
                let acceptor: Arc<dyn ResponseAcceptor> = match registry.get(message_id) {
                    Some(a) => a,
                    None => return,
                };
                if acceptor.response_received(response).is_err() {
                    return;
                }
                if terminal {
                    registry.deregister(message_id);
                }
            }
        });
    }
}

impl Transport for ScriptedTransport {
    fn host_port(&self) -> &str {
        &self.host_port
    }

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn statistics(&self) -> &ConnectionStatistics {
        &self.stats
    }

    fn next_message_id(&self) -> i32 {
        correlator::next_message_id(&self.next_id)
    }

    fn send_message(&self, encoded: &[u8]) -> Result<(), LdapError> {
        self.sent.lock().push(encoded.to_vec());
        if !self.options.use_synchronous_mode {
            self.spawn_pusher(peek_message_id(encoded)?);
        }
        Ok(())
    }

    fn read_response(&self, _message_id: i32) -> Result<Option<Response>, LdapError> {
        match self.steps.lock().pop_front() {
            Some(Step::Respond(r)) => Ok(Some(r)),
            Some(Step::Hang) | None => Ok(None),
        }
    }

    fn set_response_timeout(&self, timeout: Option<Duration>) -> Result<(), LdapError> {
        *self.timeout.lock() = timeout;
        Ok(())
    }

    fn register_response_acceptor(
        &self,
        message_id: i32,
        acceptor: Arc<dyn ResponseAcceptor>,
    ) -> Result<(), LdapError> {
        self.registry.register(message_id, acceptor)
    }

    fn deregister_response_acceptor(&self, message_id: i32) {
        self.registry.deregister(message_id);
    }

    fn close(&self, reason: &str) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.stats.increment_disconnects();
        self.options
            .operation_logger()
            .connection_closed(&self.host_port, reason);
    }
}

#[derive(Default)]
struct NetworkState {
    scripts: Mutex<HashMap<String, VecDeque<Vec<Step>>>>,
    sent: Mutex<HashMap<String, SentLog>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    registries: Mutex<Vec<Arc<AcceptorRegistry>>>,
}

/// Referral connector handing out scripted transports per `host:port`.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<NetworkState>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next connection opened to `host_port`.
    pub fn script(&self, host_port: &str, steps: Vec<Step>) {
        self.state
            .scripts
            .lock()
            .entry(host_port.to_string())
            .or_default()
            .push_back(steps);
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Ids still registered on any connection this network handed out.
    pub fn registered_ids(&self) -> Vec<i32> {
        self.state
            .registries
            .lock()
            .iter()
            .flat_map(|r| r.ids())
            .collect()
    }

    pub fn sent_requests(&self, host_port: &str) -> Vec<SearchRequest> {
        let log = match self.state.sent.lock().get(host_port) {
            Some(log) => Arc::clone(log),
            None => return Vec::new(),
        };
        let frames = log.lock().clone();
        frames
            .iter()
            .filter_map(|f| match decode_request(f) {
                Ok((_, Request::Search(s))) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl ReferralConnector for MockNetwork {
    fn referral_connection(
        &self,
        url: &LdapUrl,
        origin: &dyn Transport,
    ) -> Result<Box<dyn Transport>, LdapError> {
        let host_port = url.host_port().unwrap_or_default();
        let steps = self
            .state
            .scripts
            .lock()
            .get_mut(&host_port)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| LdapError::Connect {
                host_port: host_port.clone(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no scripted server"),
            })?;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let sent = Arc::clone(self.state.sent.lock().entry(host_port.clone()).or_default());
        let transport = ScriptedTransport::build(
            &host_port,
            origin.options().clone(),
            steps,
            sent,
            Arc::clone(&self.state.closed),
        );
        self.state.registries.lock().push(Arc::clone(&transport.registry));
        Ok(Box::new(transport))
    }
}

/// Operation logger that remembers every connection close.
#[derive(Default)]
pub struct RecordingLogger {
    closes: Mutex<Vec<(String, String)>>,
}

impl RecordingLogger {
    pub fn closes(&self) -> Vec<(String, String)> {
        self.closes.lock().clone()
    }
}

impl OperationLogger for RecordingLogger {
    fn connection_closed(&self, host_port: &str, reason: &str) {
        self.closes
            .lock()
            .push((host_port.to_string(), reason.to_string()));
    }
}
