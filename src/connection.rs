//! Blocking TCP connection to a directory server
//!
//! In asynchronous mode a dedicated reader thread owns the read half of the
//! socket and routes every inbound message to the acceptor registered for its
//! message id. In synchronous mode there is no reader thread and the calling
//! thread reads the socket itself; only one synchronous operation should be
//! outstanding on a connection at a time.

use crate::correlator::{self, AcceptorRegistry, ResponseAcceptor};
use crate::error::LdapError;
use crate::executor;
use crate::extended::{ExtendedRequest, ExtendedResult};
use crate::options::ConnectionOptions;
use crate::protocol_core::{decode_response_unit, encode_message, read_frame, UnbindRequest};
use crate::response::Response;
use crate::search::{AsyncSearchResultListener, SearchRequest, SearchResult};
use crate::stats::ConnectionStatistics;
use crate::transport::{ReferralConnector, Transport};
use crate::url::LdapUrl;
use parking_lot::Mutex;
use std::io::{BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State shared with the reader thread.
struct Shared {
    host_port: String,
    registry: AcceptorRegistry,
    disconnected: AtomicBool,
}

impl Shared {
    /// Mark the connection dead and take every pending acceptor. The registry
    /// is closed in the same step, so no registration can slip in afterwards.
    fn mark_disconnected(&self) -> Vec<(i32, Arc<dyn ResponseAcceptor>)> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.registry.close()
    }
}

pub struct LdapConnection {
    shared: Arc<Shared>,
    options: ConnectionOptions,
    stats: Arc<ConnectionStatistics>,
    next_id: AtomicI32,
    writer: Mutex<TcpStream>,
    sync_reader: Mutex<Option<BufReader<TcpStream>>>,
    close_requested: AtomicBool,
}

fn open_stream(host: &str, port: u16, connect_timeout_ms: u64) -> Result<TcpStream, LdapError> {
    let host_port = format!("{host}:{port}");
    let connect_err = |source: std::io::Error| LdapError::Connect {
        host_port: host_port.clone(),
        source,
    };
    let addrs = (host, port).to_socket_addrs().map_err(connect_err)?;
    let mut last_err = std::io::Error::new(ErrorKind::NotFound, "host resolved to no addresses");
    for addr in addrs {
        let attempt = if connect_timeout_ms == 0 {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, Duration::from_millis(connect_timeout_ms))
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(connect_err(last_err))
}

impl LdapConnection {
    pub fn connect(host: &str, port: u16, options: ConnectionOptions) -> Result<Self, LdapError> {
        let stream = open_stream(host, port, options.connect_timeout_ms)?;
        let _ = stream.set_nodelay(true);
        let host_port = format!("{host}:{port}");
        let read_half = stream.try_clone()?;

        let shared = Arc::new(Shared {
            host_port: host_port.clone(),
            registry: AcceptorRegistry::new(&host_port),
            disconnected: AtomicBool::new(false),
        });
        let stats = Arc::new(ConnectionStatistics::new());
        stats.increment_connects();

        let sync_reader = if options.use_synchronous_mode {
            Some(BufReader::new(read_half))
        } else {
            let reader_shared = Arc::clone(&shared);
            let _ = thread::Builder::new()
                .name(format!("ldap-reader {host_port}"))
                .spawn(move || reader_loop(BufReader::new(read_half), reader_shared))?;
            None
        };
        info!(conn = %host_port, sync = options.use_synchronous_mode, "connected");

        Ok(Self {
            shared,
            options,
            stats,
            next_id: AtomicI32::new(1),
            writer: Mutex::new(stream),
            sync_reader: Mutex::new(sync_reader),
            close_requested: AtomicBool::new(false),
        })
    }

    pub fn connect_url(url: &LdapUrl, options: ConnectionOptions) -> Result<Self, LdapError> {
        if url.is_secure() {
            return Err(LdapError::Unsupported(format!("secure connections are not available ({url})")));
        }
        let host = url.host.as_deref().ok_or_else(|| LdapError::Url {
            url: url.to_string(),
            reason: "no host".into(),
        })?;
        Self::connect(host, url.port, options)
    }

    /// Run a search and classify the outcome: any non-success code is an error.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, LdapError> {
        executor::process_search(self, request, 1)?.into_result()
    }

    /// Run a search and return the result whatever its code.
    pub fn process_search(&self, request: &SearchRequest) -> Result<SearchResult, LdapError> {
        executor::process_search(self, request, 1)
    }

    /// Send a search and return its message id; units go to `listener` on the
    /// reader thread.
    pub fn async_search(
        &self,
        request: &SearchRequest,
        listener: Arc<dyn AsyncSearchResultListener>,
    ) -> Result<i32, LdapError> {
        executor::async_search(self, Arc::clone(&self.stats), request, listener)
    }

    pub fn extended_operation(&self, request: &ExtendedRequest) -> Result<ExtendedResult, LdapError> {
        executor::process_extended(self, request, 1)?.into_result()
    }

    /// Authorization identity of this connection (`""` when anonymous).
    pub fn who_am_i(&self) -> Result<String, LdapError> {
        let result = self.extended_operation(&ExtendedRequest::who_am_i())?;
        Ok(result.authorization_id().unwrap_or_default())
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.disconnected.load(Ordering::SeqCst)
            && !self.close_requested.load(Ordering::SeqCst)
    }

    fn closed_error(&self, message: &str) -> LdapError {
        LdapError::ConnectionClosed {
            host_port: self.shared.host_port.clone(),
            message: Some(message.to_string()),
            partial: None,
        }
    }
}

fn reader_loop(mut stream: BufReader<TcpStream>, shared: Arc<Shared>) {
    let reason = loop {
        let frame = match read_frame(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => break None,
            Err(e) => break Some(e.to_string()),
        };
        match decode_response_unit(&frame) {
            Ok((_, Response::ConnectionClosed { message })) => {
                info!(conn = %shared.host_port, ?message, "notice of disconnection received");
                break message;
            }
            Ok((message_id, response)) => {
                if let Response::Undecodable { message } = &response {
                    warn!(conn = %shared.host_port, message_id, error = %message, "undecodable response; failing its operation");
                }
                let terminal = response.is_terminal();
                match shared.registry.get(message_id) {
                    Some(acceptor) => {
                        if let Err(e) = acceptor.response_received(response) {
                            debug!(conn = %shared.host_port, message_id, error = %e, "acceptor went away");
                        }
                        if terminal {
                            shared.registry.deregister(message_id);
                        }
                    }
                    None => {
                        warn!(conn = %shared.host_port, message_id, "discarding response for unknown message id")
                    }
                }
            }
            Err(e) => {
                warn!(conn = %shared.host_port, error = %e, "malformed message envelope; closing");
                break Some(e.to_string());
            }
        }
    };
    let orphans = shared.mark_disconnected();
    debug!(conn = %shared.host_port, pending = orphans.len(), "reader stopped");
    for (_, acceptor) in orphans {
        let _ = acceptor.response_received(Response::ConnectionClosed {
            message: reason.clone(),
        });
    }
}

impl Transport for LdapConnection {
    fn host_port(&self) -> &str {
        &self.shared.host_port
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
        if !self.is_connected() {
            return Err(self.closed_error("the connection is no longer established"));
        }
        let mut writer = self.writer.lock();
        writer.write_all(encoded)?;
        writer.flush()?;
        Ok(())
    }

    fn read_response(&self, message_id: i32) -> Result<Option<Response>, LdapError> {
        let mut guard = self.sync_reader.lock();
        let reader = guard
            .as_mut()
            .ok_or_else(|| LdapError::Unsupported("direct reads need synchronous mode".into()))?;
        loop {
            let frame = match read_frame(reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.shared.mark_disconnected();
                    return Ok(Some(Response::ConnectionClosed { message: None }));
                }
                Err(LdapError::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Ok(None)
                }
                Err(LdapError::Io(e)) => {
                    self.shared.mark_disconnected();
                    return Ok(Some(Response::ConnectionClosed {
                        message: Some(e.to_string()),
                    }));
                }
                Err(e) => return Err(e),
            };
            match decode_response_unit(&frame)? {
                (_, closed @ Response::ConnectionClosed { .. }) => {
                    self.shared.mark_disconnected();
                    return Ok(Some(closed));
                }
                (id, response) if id == message_id => return Ok(Some(response)),
                (id, response) => warn!(
                    conn = %self.shared.host_port,
                    message_id = id,
                    kind = response.kind(),
                    "discarding response for another operation"
                ),
            }
        }
    }

    fn set_response_timeout(&self, timeout: Option<Duration>) -> Result<(), LdapError> {
        if let Some(reader) = self.sync_reader.lock().as_ref() {
            reader.get_ref().set_read_timeout(timeout)?;
        }
        Ok(())
    }

    fn register_response_acceptor(
        &self,
        message_id: i32,
        acceptor: Arc<dyn ResponseAcceptor>,
    ) -> Result<(), LdapError> {
        self.shared.registry.register(message_id, acceptor)
    }

    fn deregister_response_acceptor(&self, message_id: i32) {
        self.shared.registry.deregister(message_id);
    }

    fn close(&self, reason: &str) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut writer = self.writer.lock();
            if !self.shared.disconnected.load(Ordering::SeqCst) {
                let unbind = encode_message(self.next_message_id(), &UnbindRequest, &[]);
                let _ = writer.write_all(&unbind);
            }
            let _ = writer.shutdown(Shutdown::Both);
        }
        self.stats.increment_disconnects();
        self.options
            .operation_logger()
            .connection_closed(&self.shared.host_port, reason);
        debug!(conn = %self.shared.host_port, reason, "connection closed");
    }
}

impl Drop for LdapConnection {
    fn drop(&mut self) {
        self.close("closed by client");
    }
}

impl fmt::Debug for LdapConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConnection")
            .field("host_port", &self.shared.host_port)
            .field("connected", &self.is_connected())
            .field("synchronous", &self.options.use_synchronous_mode)
            .field("pending", &self.shared.registry.len())
            .finish()
    }
}

/// Opens a plain TCP connection with the origin's options.
pub struct DefaultReferralConnector;

impl ReferralConnector for DefaultReferralConnector {
    fn referral_connection(
        &self,
        url: &LdapUrl,
        origin: &dyn Transport,
    ) -> Result<Box<dyn Transport>, LdapError> {
        Ok(Box::new(LdapConnection::connect_url(url, origin.options().clone())?))
    }
}
