//! Per-invocation accumulation of streamed search units

use crate::result::LdapResult;
use crate::result_code::ResultCode;
use crate::search::{SearchResult, SearchResultEntry, SearchResultListener, SearchResultReference, SearchSink};
use std::sync::Arc;

pub struct Aggregator {
    listener: Option<Arc<dyn SearchResultListener>>,
    entry_count: usize,
    reference_count: usize,
    entries: Vec<SearchResultEntry>,
    references: Vec<SearchResultReference>,
    intermediate: ResultCode,
}

impl Aggregator {
    pub fn new(sink: &SearchSink) -> Self {
        Self {
            listener: match sink {
                SearchSink::Collect => None,
                SearchSink::Stream(l) => Some(Arc::clone(l)),
            },
            entry_count: 0,
            reference_count: 0,
            entries: Vec::new(),
            references: Vec::new(),
            intermediate: ResultCode::SUCCESS,
        }
    }

    pub fn entry_returned(&mut self, entry: SearchResultEntry) {
        self.entry_count += 1;
        match &self.listener {
            Some(l) => l.search_entry_returned(entry),
            None => self.entries.push(entry),
        }
    }

    pub fn reference_returned(&mut self, reference: SearchResultReference) {
        self.reference_count += 1;
        match &self.listener {
            Some(l) => l.search_reference_returned(reference),
            None => self.references.push(reference),
        }
    }

    /// A reference that could not be followed is kept as-is; only the first
    /// failure's code is remembered.
    pub fn reference_failed(&mut self, reference: SearchResultReference, code: ResultCode) {
        self.reference_returned(reference);
        if self.intermediate.is_success() {
            self.intermediate = code;
        }
    }

    /// Fold in the entries a successfully followed reference produced. The
    /// reference count is left alone. Streamed units were already delivered
    /// by the hop itself.
    pub fn merge_remote(&mut self, remote: SearchResult) {
        let (_, entries, _, remote_entries, _) = remote.into_parts();
        self.entry_count += entries;
        if self.listener.is_none() {
            self.entries.extend(remote_entries.unwrap_or_default());
        }
    }

    pub fn intermediate_result_code(&self) -> ResultCode {
        self.intermediate
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    /// Stamp counts and, when collecting, the lists onto `result`.
    pub fn into_result(self, message_id: i32, result: LdapResult) -> SearchResult {
        let collect = self.listener.is_none();
        SearchResult::from_parts(
            message_id,
            result,
            self.entry_count,
            self.reference_count,
            collect.then_some(self.entries),
            collect.then_some(self.references),
        )
    }

    /// Replace this hop's terminal referral with the outcome of following it,
    /// keeping what this hop already observed in front.
    pub fn prepend_to(self, message_id: i32, remote: SearchResult) -> SearchResult {
        let (result, entries, references, remote_entries, remote_references) = remote.into_parts();
        let collect = self.listener.is_none();
        let mut all_entries = self.entries;
        let mut all_references = self.references;
        all_entries.extend(remote_entries.unwrap_or_default());
        all_references.extend(remote_references.unwrap_or_default());
        SearchResult::from_parts(
            message_id,
            result,
            self.entry_count + entries,
            self.reference_count + references,
            collect.then_some(all_entries),
            collect.then_some(all_references),
        )
    }
}

/// Downgrade a success to the recorded intermediate code, keeping everything
/// else the server sent.
pub fn apply_intermediate(result: SearchResult, intermediate: ResultCode) -> SearchResult {
    if !result.result_code().is_success() || intermediate.is_success() {
        return result;
    }
    let message_id = result.message_id();
    let (mut ldap_result, entries, references, e, r) = result.into_parts();
    ldap_result.result_code = intermediate;
    SearchResult::from_parts(message_id, ldap_result, entries, references, e, r)
}

/// Result synthesized when another hop would exceed the limit.
pub fn referral_limit_result(referral: &LdapResult) -> LdapResult {
    LdapResult {
        result_code: ResultCode::REFERRAL_LIMIT_EXCEEDED,
        matched_dn: referral.matched_dn.clone(),
        diagnostic_message: Some("too many referrals".to_string()),
        referral_urls: referral.referral_urls.clone(),
        response_controls: referral.response_controls.clone(),
    }
}
