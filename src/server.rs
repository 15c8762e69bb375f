//! In-memory directory server (tokio)
//!
//! Serves search and a couple of extended operations from a fixed set of
//! entries. Entries with the `referral` object class are answered with
//! continuation references (inside the search scope) or a `REFERRAL` result
//! (when the search base sits at or below one).

use crate::entry::{dn, Entry};
use crate::error::LdapError;
use crate::extended::{ExtendedRequest, ExtendedResult};
use crate::fixture::EntryFile;
use crate::interceptor::{
    InMemoryOperationInterceptor, InterceptedExtendedRequest, InterceptedExtendedResult,
    InterceptedSearchEntry, InterceptedSearchRequest, InterceptedSearchResult,
};
use crate::protocol::oid;
use crate::protocol_core::{
    decode_request, encode_message, extra_length_octets, frame_total_len,
    notice_of_disconnection, Request,
};
use crate::result::{LdapResult, SearchResultDone};
use crate::result_code::ResultCode;
use crate::search::{
    SearchRequest, SearchResultEntry, SearchResultReference, SearchScope, NO_ATTRIBUTES,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub const REFERRAL_OBJECT_CLASS: &str = "referral";
pub const REF_ATTRIBUTE: &str = "ref";

/// Build a referral entry pointing at `urls`.
pub fn referral_entry<I, S>(dn: &str, urls: I) -> Entry
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Entry::new(dn)
        .with_attribute("objectClass", ["top", REFERRAL_OBJECT_CLASS])
        .with_attribute(REF_ATTRIBUTE, urls)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub base_dns: Vec<String>,
    pub data_file: Option<PathBuf>,
    /// Server-side size limit; 0 means none.
    pub max_size_limit: i32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3389".to_string(),
            base_dns: vec!["dc=example,dc=com".to_string()],
            data_file: None,
            max_size_limit: 0,
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read server settings {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid server settings {}", path.display()))
    }
}

pub enum SearchUnit {
    Entry(SearchResultEntry),
    Reference(SearchResultReference),
}

pub struct SearchOutcome {
    pub units: Vec<SearchUnit>,
    pub result: LdapResult,
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    base_dns: Vec<String>,
    entries: Vec<Entry>,
}

fn is_referral(entry: &Entry) -> bool {
    entry.has_object_class(REFERRAL_OBJECT_CLASS)
}

fn in_scope(depth: usize, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => depth == 0,
        SearchScope::OneLevel => depth == 1,
        SearchScope::Subtree => true,
        SearchScope::Subordinate => depth >= 1,
    }
}

fn project(entry: &Entry, attributes: &[String], types_only: bool) -> Entry {
    let all_user = attributes.is_empty() || attributes.iter().any(|a| a == "*");
    let none = !all_user && attributes.iter().all(|a| a == NO_ATTRIBUTES);
    let mut projected = Entry::new(entry.dn.clone());
    if none {
        return projected;
    }
    projected.attributes = entry
        .attributes
        .iter()
        .filter(|a| all_user || attributes.iter().any(|r| r.eq_ignore_ascii_case(&a.name)))
        .cloned()
        .map(|mut a| {
            if types_only {
                a.clear_values();
            }
            a
        })
        .collect();
    projected
}

impl InMemoryDirectory {
    pub fn new<I, S>(base_dns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_dns: base_dns.into_iter().map(Into::into).collect(),
            entries: Vec::new(),
        }
    }

    pub fn base_dns(&self) -> &[String] {
        &self.base_dns
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, dn_str: &str) -> Option<&Entry> {
        let wanted = dn::normalize(dn_str);
        self.entries.iter().find(|e| dn::normalize(&e.dn) == wanted)
    }

    fn under_base(&self, dn_str: &str) -> bool {
        self.base_dns.iter().any(|b| dn::is_descendant_or_self(dn_str, b))
    }

    pub fn add(&mut self, entry: Entry) -> Result<()> {
        if !self.under_base(&entry.dn) {
            bail!("entry {} is not below any base DN", entry.dn);
        }
        if self.get(&entry.dn).is_some() {
            bail!("entry {} already exists", entry.dn);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn add_all<I: IntoIterator<Item = Entry>>(&mut self, entries: I) -> Result<()> {
        for entry in entries {
            self.add(entry)?;
        }
        Ok(())
    }

    /// Nearest entry at or above `dn_str`, walking towards the root.
    fn nearest_existing(&self, dn_str: &str) -> Option<&Entry> {
        let mut current = Some(dn::normalize(dn_str));
        while let Some(candidate) = current {
            if let Some(entry) = self.get(&candidate) {
                return Some(entry);
            }
            if candidate.is_empty() {
                break;
            }
            current = dn::parent(&candidate);
        }
        None
    }

    /// Referral entry at or above `dn_str`, if any.
    fn referral_at_or_above(&self, dn_str: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|e| is_referral(e) && dn::is_descendant_or_self(dn_str, &e.dn))
            .min_by_key(|e| dn::rdns(&e.dn).len())
    }

    /// True when `dn_str` lies underneath a referral entry that is itself
    /// below `base`.
    fn hidden_by_referral(&self, dn_str: &str, base: &str) -> bool {
        self.entries.iter().any(|r| {
            is_referral(r)
                && dn::depth_below(&r.dn, base).map_or(false, |d| d >= 1)
                && dn::depth_below(dn_str, &r.dn).map_or(false, |d| d >= 1)
        })
    }

    pub fn search(&self, request: &SearchRequest, max_size_limit: i32) -> SearchOutcome {
        let base = request.base_dn();
        if !self.under_base(base) {
            return SearchOutcome {
                units: Vec::new(),
                result: LdapResult::new(ResultCode::NO_SUCH_OBJECT)
                    .with_diagnostic(format!("'{base}' is not within any naming context")),
            };
        }
        if let Some(referral) = self.referral_at_or_above(base) {
            return SearchOutcome {
                units: Vec::new(),
                result: LdapResult::new(ResultCode::REFERRAL)
                    .with_matched_dn(referral.dn.clone())
                    .with_referrals(referral.values(REF_ATTRIBUTE).iter().cloned()),
            };
        }
        if self.get(base).is_none() {
            let mut result = LdapResult::new(ResultCode::NO_SUCH_OBJECT)
                .with_diagnostic(format!("entry '{base}' does not exist"));
            if let Some(parent) = dn::parent(base).and_then(|p| self.nearest_existing(&p)) {
                result = result.with_matched_dn(parent.dn.clone());
            }
            return SearchOutcome {
                units: Vec::new(),
                result,
            };
        }

        let limit = match (request.size_limit(), max_size_limit) {
            (0, server) => server,
            (client, 0) => client,
            (client, server) => client.min(server),
        };
        let mut units = Vec::new();
        let mut returned = 0;
        for entry in &self.entries {
            let depth = match dn::depth_below(&entry.dn, base) {
                Some(depth) if in_scope(depth, request.scope()) => depth,
                _ => continue,
            };
            if self.hidden_by_referral(&entry.dn, base) {
                continue;
            }
            if depth >= 1 && is_referral(entry) {
                units.push(SearchUnit::Reference(SearchResultReference::new(
                    entry.values(REF_ATTRIBUTE).iter().cloned(),
                )));
                continue;
            }
            if !request.filter().matches(entry) {
                continue;
            }
            if limit > 0 && returned == limit {
                return SearchOutcome {
                    units,
                    result: LdapResult::new(ResultCode::SIZE_LIMIT_EXCEEDED)
                        .with_diagnostic(format!("size limit of {limit} entries exceeded")),
                };
            }
            returned += 1;
            units.push(SearchUnit::Entry(SearchResultEntry::new(project(
                entry,
                request.attributes(),
                request.types_only(),
            ))));
        }
        SearchOutcome {
            units,
            result: LdapResult::success(),
        }
    }
}

struct ServerState {
    directory: InMemoryDirectory,
    interceptors: Vec<Arc<dyn InMemoryOperationInterceptor>>,
    max_size_limit: i32,
    next_connection_id: AtomicU64,
}

impl ServerState {
    fn search(&self, connection_id: u64, message_id: i32, request: SearchRequest) -> Vec<Vec<u8>> {
        let mut intercepted = InterceptedSearchRequest::new(connection_id, message_id, request);
        for interceptor in &self.interceptors {
            if let Err(rejected) = interceptor.process_search_request(&mut intercepted) {
                return vec![encode_message(message_id, &SearchResultDone(&rejected), &[])];
            }
        }
        let request = intercepted.into_request();
        let outcome = self.directory.search(&request, self.max_size_limit);

        let mut out = Vec::with_capacity(outcome.units.len() + 1);
        for unit in outcome.units {
            match unit {
                SearchUnit::Entry(entry) => {
                    let mut current = Some(entry);
                    for interceptor in &self.interceptors {
                        let Some(entry) = current.take() else { break };
                        let mut intercepted = InterceptedSearchEntry::new(&request, entry);
                        interceptor.process_search_entry(&mut intercepted);
                        current = intercepted.into_entry();
                    }
                    if let Some(entry) = current {
                        out.push(encode_message(message_id, &entry, &entry.controls));
                    }
                }
                SearchUnit::Reference(reference) => {
                    out.push(encode_message(message_id, &reference, &reference.controls))
                }
            }
        }

        let mut intercepted = InterceptedSearchResult::new(&request, outcome.result);
        for interceptor in &self.interceptors {
            interceptor.process_search_result(&mut intercepted);
        }
        let result = intercepted.into_result();
        debug!(connection_id, message_id, code = %result.result_code, "search done");
        out.push(encode_message(message_id, &SearchResultDone(&result), &result.response_controls));
        out
    }

    fn extended(&self, connection_id: u64, message_id: i32, request: ExtendedRequest) -> Vec<u8> {
        let mut intercepted = InterceptedExtendedRequest::new(connection_id, message_id, request);
        for interceptor in &self.interceptors {
            if let Err(rejected) = interceptor.process_extended_request(&mut intercepted) {
                let result = ExtendedResult::new(message_id, rejected, None, None);
                return encode_message(message_id, &result, &[]);
            }
        }
        let request = intercepted.into_request();
        let result = if request.oid() == oid::WHO_AM_I {
            ExtendedResult::new(message_id, LdapResult::success(), None, Some(Vec::new()))
        } else {
            ExtendedResult::new(
                message_id,
                LdapResult::new(ResultCode::PROTOCOL_ERROR)
                    .with_diagnostic(format!("unsupported extended operation {}", request.oid())),
                None,
                None,
            )
        };
        let mut intercepted = InterceptedExtendedResult::new(&request, result);
        for interceptor in &self.interceptors {
            interceptor.process_extended_result(&mut intercepted);
        }
        encode_message(message_id, &intercepted.into_result(), &[])
    }
}

async fn read_request_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, LdapError> {
    let mut header = vec![0u8; 2];
    match stream.read_exact(&mut header[..1]).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    stream.read_exact(&mut header[1..2]).await?;
    let extra = extra_length_octets(header[1]);
    if extra > 0 {
        header.resize(2 + extra, 0);
        stream.read_exact(&mut header[2..]).await?;
    }
    let total = frame_total_len(&header)?;
    let mut frame = header;
    let header_len = frame.len();
    frame.resize(total, 0);
    stream.read_exact(&mut frame[header_len..]).await?;
    Ok(Some(frame))
}

async fn handle_connection(mut stream: TcpStream, connection_id: u64, state: Arc<ServerState>) -> Result<()> {
    while let Some(frame) = read_request_frame(&mut stream).await? {
        let (message_id, request) = match decode_request(&frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(connection_id, error = %e, "undecodable request; disconnecting");
                let notice = LdapResult::new(ResultCode::PROTOCOL_ERROR).with_diagnostic(e.to_string());
                stream.write_all(&notice_of_disconnection(notice)).await?;
                break;
            }
        };
        match request {
            Request::Search(search) => {
                debug!(connection_id, message_id, "{search}");
                for message in state.search(connection_id, message_id, search) {
                    stream.write_all(&message).await?;
                }
            }
            Request::Extended(extended) => {
                debug!(connection_id, message_id, "{extended}");
                let message = state.extended(connection_id, message_id, extended);
                stream.write_all(&message).await?;
            }
            Request::Abandon(abandoned) => {
                debug!(connection_id, abandoned, "abandon ignored");
            }
            Request::Unbind => {
                debug!(connection_id, "unbind");
                break;
            }
            Request::Unsupported(op_type) => {
                warn!(connection_id, op_type, "unsupported operation; disconnecting");
                let notice = LdapResult::new(ResultCode::UNWILLING_TO_PERFORM)
                    .with_diagnostic(format!("operation type 0x{op_type:02x} is not supported"));
                stream.write_all(&notice_of_disconnection(notice)).await?;
                break;
            }
        }
    }
    let _ = stream.shutdown().await;
    Ok(())
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let connection_id = state.next_connection_id.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id, %peer, "accepted");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, connection_id, state).await {
                debug!(connection_id, error = %e, "connection ended with error");
            }
        });
    }
}

pub struct InMemoryDirectoryServer {
    directory: InMemoryDirectory,
    interceptors: Vec<Arc<dyn InMemoryOperationInterceptor>>,
    max_size_limit: i32,
}

impl InMemoryDirectoryServer {
    pub fn new(directory: InMemoryDirectory) -> Self {
        Self {
            directory,
            interceptors: Vec::new(),
            max_size_limit: 0,
        }
    }

    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let mut directory = InMemoryDirectory::new(settings.base_dns.iter().cloned());
        if let Some(path) = &settings.data_file {
            let entries = EntryFile::new(path).read_entries()?;
            directory
                .add_all(entries)
                .with_context(|| format!("failed to load {}", path.display()))?;
        }
        let mut server = Self::new(directory);
        server.set_max_size_limit(settings.max_size_limit);
        Ok(server)
    }

    pub fn directory(&self) -> &InMemoryDirectory {
        &self.directory
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn InMemoryOperationInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn set_max_size_limit(&mut self, limit: i32) {
        self.max_size_limit = limit.max(0);
    }

    fn into_state(self) -> Arc<ServerState> {
        Arc::new(ServerState {
            directory: self.directory,
            interceptors: self.interceptors,
            max_size_limit: self.max_size_limit,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Serve on the current runtime until the listener fails.
    pub async fn serve(self, bind: &str) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {bind}"))?;
        info!(
            bind = %listener.local_addr()?,
            entries = self.directory.len(),
            "in-memory directory listening"
        );
        accept_loop(listener, self.into_state()).await
    }

    /// Run the server on a dedicated runtime thread, for callers that are
    /// not async themselves.
    pub fn start(self, bind: &str) -> Result<RunningServer> {
        let listener = std::net::TcpListener::bind(bind).with_context(|| format!("bind {bind}"))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;
        let state = self.into_state();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name(format!("in-memory-ds {addr}"))
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener)?;
                    tokio::select! {
                        r = accept_loop(listener, state) => r,
                        _ = shutdown_rx => Ok(()),
                    }
                })
            })
            .context("failed to spawn server thread")?;
        info!(%addr, "in-memory directory started");
        Ok(RunningServer {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

pub struct RunningServer {
    addr: std::net::SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl RunningServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn host_port(&self) -> String {
        self.addr.to_string()
    }

    /// `ldap://host:port/` followed by `dn`.
    pub fn url(&self, dn: &str) -> String {
        format!("ldap://{}/{}", self.addr, dn)
    }

    /// Stop accepting and drop every open connection.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Err(e)) => warn!(error = %e, "in-memory directory stopped with error"),
                Err(_) => warn!("in-memory directory thread panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
