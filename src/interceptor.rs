//! Hooks the in-memory server runs around each operation
//!
//! Request hooks may swap the request for another of the same kind or reject
//! it outright with a result; the server then executes whatever the hook left
//! in place. Entry hooks may rewrite or suppress entries, and result hooks may
//! rewrite the final result before it goes on the wire.

use crate::extended::{ExtendedRequest, ExtendedResult};
use crate::result::LdapResult;
use crate::search::{SearchRequest, SearchResultEntry};

pub struct InterceptedSearchRequest {
    connection_id: u64,
    message_id: i32,
    request: SearchRequest,
}

impl InterceptedSearchRequest {
    pub(crate) fn new(connection_id: u64, message_id: i32, request: SearchRequest) -> Self {
        Self {
            connection_id,
            message_id,
            request,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    pub fn set_request(&mut self, request: SearchRequest) {
        self.request = request;
    }

    pub(crate) fn into_request(self) -> SearchRequest {
        self.request
    }
}

pub struct InterceptedSearchEntry<'a> {
    request: &'a SearchRequest,
    entry: Option<SearchResultEntry>,
}

impl<'a> InterceptedSearchEntry<'a> {
    pub(crate) fn new(request: &'a SearchRequest, entry: SearchResultEntry) -> Self {
        Self {
            request,
            entry: Some(entry),
        }
    }

    pub fn request(&self) -> &SearchRequest {
        self.request
    }

    pub fn entry(&self) -> Option<&SearchResultEntry> {
        self.entry.as_ref()
    }

    /// `None` drops the entry from the response.
    pub fn set_entry(&mut self, entry: Option<SearchResultEntry>) {
        self.entry = entry;
    }

    pub(crate) fn into_entry(self) -> Option<SearchResultEntry> {
        self.entry
    }
}

pub struct InterceptedSearchResult<'a> {
    request: &'a SearchRequest,
    result: LdapResult,
}

impl<'a> InterceptedSearchResult<'a> {
    pub(crate) fn new(request: &'a SearchRequest, result: LdapResult) -> Self {
        Self { request, result }
    }

    pub fn request(&self) -> &SearchRequest {
        self.request
    }

    pub fn result(&self) -> &LdapResult {
        &self.result
    }

    pub fn set_result(&mut self, result: LdapResult) {
        self.result = result;
    }

    pub(crate) fn into_result(self) -> LdapResult {
        self.result
    }
}

pub struct InterceptedExtendedRequest {
    connection_id: u64,
    message_id: i32,
    request: ExtendedRequest,
}

impl InterceptedExtendedRequest {
    pub(crate) fn new(connection_id: u64, message_id: i32, request: ExtendedRequest) -> Self {
        Self {
            connection_id,
            message_id,
            request,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn request(&self) -> &ExtendedRequest {
        &self.request
    }

    pub fn set_request(&mut self, request: ExtendedRequest) {
        self.request = request;
    }

    pub(crate) fn into_request(self) -> ExtendedRequest {
        self.request
    }
}

pub struct InterceptedExtendedResult<'a> {
    request: &'a ExtendedRequest,
    result: ExtendedResult,
}

impl<'a> InterceptedExtendedResult<'a> {
    pub(crate) fn new(request: &'a ExtendedRequest, result: ExtendedResult) -> Self {
        Self { request, result }
    }

    pub fn request(&self) -> &ExtendedRequest {
        self.request
    }

    pub fn result(&self) -> &ExtendedResult {
        &self.result
    }

    pub fn set_result(&mut self, result: ExtendedResult) {
        self.result = result;
    }

    pub(crate) fn into_result(self) -> ExtendedResult {
        self.result
    }
}

/// Every hook defaults to leaving the operation untouched. A request hook
/// returning `Err` answers the operation with that result instead of running it.
pub trait InMemoryOperationInterceptor: Send + Sync {
    fn process_search_request(&self, _request: &mut InterceptedSearchRequest) -> Result<(), LdapResult> {
        Ok(())
    }

    fn process_search_entry(&self, _entry: &mut InterceptedSearchEntry<'_>) {}

    fn process_search_result(&self, _result: &mut InterceptedSearchResult<'_>) {}

    fn process_extended_request(&self, _request: &mut InterceptedExtendedRequest) -> Result<(), LdapResult> {
        Ok(())
    }

    fn process_extended_result(&self, _result: &mut InterceptedExtendedResult<'_>) {}
}
