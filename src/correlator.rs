//! Request/response correlation by message id
//!
//! Each operation registers its id against the connection before the request
//! is written. In asynchronous mode the connection reader thread hands units to
//! the registered [`ResponseAcceptor`]; for blocking callers that acceptor is a
//! bounded queue. A full queue blocks the reader, and with it every other
//! operation on the same connection, until the caller drains it.

use crate::control::Control;
use crate::error::LdapError;
use crate::protocol::timeouts;
use crate::protocol_core::{encode_message, ProtocolOp};
use crate::response::Response;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Receives the units addressed to one message id, on the reader thread.
pub trait ResponseAcceptor: Send + Sync {
    fn response_received(&self, response: Response) -> Result<(), LdapError>;
}

#[derive(Default)]
struct RegistryState {
    acceptors: HashMap<i32, Arc<dyn ResponseAcceptor>>,
    closed: bool,
}

/// Message id to acceptor map of one connection. Once closed it refuses new
/// registrations; the closed check and the insert happen under one lock.
pub struct AcceptorRegistry {
    host_port: String,
    state: Mutex<RegistryState>,
}

impl AcceptorRegistry {
    pub fn new(host_port: &str) -> Self {
        Self {
            host_port: host_port.to_string(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn register(&self, message_id: i32, acceptor: Arc<dyn ResponseAcceptor>) -> Result<(), LdapError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LdapError::ConnectionClosed {
                host_port: self.host_port.clone(),
                message: Some("the connection is no longer established".into()),
                partial: None,
            });
        }
        if state.acceptors.contains_key(&message_id) {
            return Err(LdapError::Protocol(format!(
                "message id {message_id} already has a registered acceptor"
            )));
        }
        state.acceptors.insert(message_id, acceptor);
        Ok(())
    }

    pub fn deregister(&self, message_id: i32) -> Option<Arc<dyn ResponseAcceptor>> {
        self.state.lock().acceptors.remove(&message_id)
    }

    pub fn get(&self, message_id: i32) -> Option<Arc<dyn ResponseAcceptor>> {
        self.state.lock().acceptors.get(&message_id).cloned()
    }

    /// Refuse further registrations and hand back every pending acceptor.
    /// Used when the connection dies.
    pub fn close(&self) -> Vec<(i32, Arc<dyn ResponseAcceptor>)> {
        let mut state = self.state.lock();
        state.closed = true;
        state.acceptors.drain().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.state.lock().acceptors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.lock().acceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Take the next message id from `counter` (which starts at 1), wrapping
/// from `i32::MAX` back to 1. Zero is reserved for unsolicited notifications.
pub fn next_message_id(counter: &AtomicI32) -> i32 {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
            Some(if id == i32::MAX { 1 } else { id + 1 })
        })
        .unwrap_or_else(|id| id)
}

/// Producer half of a blocking caller's handoff queue.
pub struct QueueAcceptor {
    tx: SyncSender<Response>,
}

impl ResponseAcceptor for QueueAcceptor {
    fn response_received(&self, response: Response) -> Result<(), LdapError> {
        // Blocks while the queue is full; fails once the caller has gone away
        self.tx
            .send(response)
            .map_err(|_| LdapError::Protocol("response queue receiver dropped".into()))
    }
}

/// Consumer half of the handoff queue.
pub struct ResponseQueue {
    rx: Receiver<Response>,
    host_port: String,
}

pub fn response_queue(capacity: usize, host_port: &str) -> (QueueAcceptor, ResponseQueue) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        QueueAcceptor { tx },
        ResponseQueue {
            rx,
            host_port: host_port.to_string(),
        },
    )
}

impl ResponseQueue {
    /// `Ok(None)` when nothing arrived within `timeout`.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<Option<Response>, LdapError> {
        let interrupted = || LdapError::LocalInterrupt {
            host_port: self.host_port.clone(),
        };
        match timeout {
            None => self.rx.recv().map(Some).map_err(|_| interrupted()),
            Some(t) => match self.rx.recv_timeout(t) {
                Ok(r) => Ok(Some(r)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(interrupted()),
            },
        }
    }
}

/// Deregisters its message id when dropped, on every exit path.
pub struct Registration<'a> {
    transport: &'a dyn Transport,
    message_id: i32,
}

impl<'a> Registration<'a> {
    pub fn register(
        transport: &'a dyn Transport,
        message_id: i32,
        acceptor: Arc<dyn ResponseAcceptor>,
    ) -> Result<Self, LdapError> {
        transport.register_response_acceptor(message_id, acceptor)?;
        Ok(Self {
            transport,
            message_id,
        })
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.transport.deregister_response_acceptor(self.message_id);
    }
}

enum Waiter<'a> {
    Sync,
    Async {
        queue: ResponseQueue,
        _registration: Registration<'a>,
    },
}

/// One in-flight operation: the id it was sent under and how to wait for it.
pub struct PendingOperation<'a> {
    transport: &'a dyn Transport,
    message_id: i32,
    timeout_ms: u64,
    waiter: Waiter<'a>,
}

/// Encode and send `protocol_op` under a fresh message id.
pub fn send<'a>(
    transport: &'a dyn Transport,
    protocol_op: &dyn ProtocolOp,
    controls: &[Control],
    request_timeout_ms: Option<u64>,
) -> Result<PendingOperation<'a>, LdapError> {
    let message_id = transport.next_message_id();
    let timeout_ms = timeouts::effective_response_timeout_ms(
        request_timeout_ms,
        transport.options().response_timeout_ms,
    );
    let encoded = encode_message(message_id, protocol_op, controls);

    let waiter = if transport.synchronous_mode() {
        transport.set_response_timeout(timeouts::as_deadline(timeout_ms))?;
        Waiter::Sync
    } else {
        let (acceptor, queue) =
            response_queue(transport.options().queue_capacity(), transport.host_port());
        let registration = Registration::register(transport, message_id, Arc::new(acceptor))?;
        Waiter::Async {
            queue,
            _registration: registration,
        }
    };

    debug!(
        conn = transport.host_port(),
        message_id,
        op_type = protocol_op.protocol_op_type(),
        bytes = encoded.len(),
        "sending request"
    );
    transport.send_message(&encoded)?;

    Ok(PendingOperation {
        transport,
        message_id,
        timeout_ms,
        waiter,
    })
}

impl PendingOperation<'_> {
    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Wait for the next unit. An expired wait is a client-side `Timeout`.
    pub fn await_next(&mut self) -> Result<Response, LdapError> {
        let next = match &self.waiter {
            Waiter::Sync => self.transport.read_response(self.message_id)?,
            Waiter::Async { queue, .. } => queue.poll(timeouts::as_deadline(self.timeout_ms))?,
        };
        match next {
            Some(response) => {
                trace!(
                    conn = self.transport.host_port(),
                    message_id = self.message_id,
                    kind = response.kind(),
                    "response received"
                );
                Ok(response)
            }
            None => Err(LdapError::Timeout {
                host_port: self.transport.host_port().to_string(),
                timeout_ms: self.timeout_ms,
                partial: None,
            }),
        }
    }
}
