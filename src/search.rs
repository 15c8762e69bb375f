//! Search request, streamed response units and the assembled search result

use crate::ber::{tag, BerReader, BerWriter};
use crate::control::Control;
use crate::entry::{Attribute, Entry};
use crate::error::LdapError;
use crate::filter::Filter;
use crate::protocol::op;
use crate::protocol_core::ProtocolOp;
use crate::result::LdapResult;
use crate::result_code::ResultCode;
use crate::url::LdapUrl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Request every user attribute.
pub const ALL_USER_ATTRIBUTES: &str = "*";
/// Request every operational attribute.
pub const ALL_OPERATIONAL_ATTRIBUTES: &str = "+";
/// Request no attributes at all.
pub const NO_ATTRIBUTES: &str = "1.1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    #[serde(alias = "one")]
    OneLevel,
    #[serde(alias = "sub")]
    Subtree,
    Subordinate,
}

impl SearchScope {
    pub fn int_value(self) -> i64 {
        match self {
            SearchScope::Base => 0,
            SearchScope::OneLevel => 1,
            SearchScope::Subtree => 2,
            SearchScope::Subordinate => 3,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            0 => Some(SearchScope::Base),
            1 => Some(SearchScope::OneLevel),
            2 => Some(SearchScope::Subtree),
            3 => Some(SearchScope::Subordinate),
            _ => None,
        }
    }
}

impl FromStr for SearchScope {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(SearchScope::Base),
            "one" | "onelevel" | "one-level" => Ok(SearchScope::OneLevel),
            "sub" | "subtree" => Ok(SearchScope::Subtree),
            "subord" | "subordinate" | "subordinates" => Ok(SearchScope::Subordinate),
            other => Err(LdapError::Protocol(format!("unknown search scope '{other}'"))),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchScope::Base => "BASE",
            SearchScope::OneLevel => "ONE",
            SearchScope::Subtree => "SUB",
            SearchScope::Subordinate => "SUBORDINATE_SUBTREE",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DerefPolicy {
    #[default]
    Never,
    Searching,
    Finding,
    Always,
}

impl DerefPolicy {
    pub fn int_value(self) -> i64 {
        match self {
            DerefPolicy::Never => 0,
            DerefPolicy::Searching => 1,
            DerefPolicy::Finding => 2,
            DerefPolicy::Always => 3,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            0 => Some(DerefPolicy::Never),
            1 => Some(DerefPolicy::Searching),
            2 => Some(DerefPolicy::Finding),
            3 => Some(DerefPolicy::Always),
            _ => None,
        }
    }
}

impl fmt::Display for DerefPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DerefPolicy::Never => "NEVER",
            DerefPolicy::Searching => "SEARCHING",
            DerefPolicy::Finding => "FINDING",
            DerefPolicy::Always => "ALWAYS",
        })
    }
}

/// Receives streamed units of a search, in server order.
pub trait SearchResultListener: Send + Sync {
    fn search_entry_returned(&self, entry: SearchResultEntry);
    fn search_reference_returned(&self, reference: SearchResultReference);
}

/// Listener for a non-blocking search; the final result arrives on the
/// connection reader thread.
pub trait AsyncSearchResultListener: Send + Sync {
    fn search_entry_returned(&self, entry: SearchResultEntry);
    fn search_reference_returned(&self, reference: SearchResultReference);
    fn search_result(&self, result: SearchResult);
}

/// Where streamed entries and references go. Fixed at construction.
#[derive(Clone, Default)]
pub enum SearchSink {
    #[default]
    Collect,
    Stream(Arc<dyn SearchResultListener>),
}

impl SearchSink {
    pub fn is_collect(&self) -> bool {
        matches!(self, SearchSink::Collect)
    }
}

impl PartialEq for SearchSink {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SearchSink::Collect, SearchSink::Collect) => true,
            (SearchSink::Stream(a), SearchSink::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for SearchSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchSink::Collect => f.write_str("Collect"),
            SearchSink::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Immutable description of a search; every execution gets its own message id.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    base_dn: String,
    scope: SearchScope,
    deref_policy: DerefPolicy,
    size_limit: i32,
    time_limit: i32,
    types_only: bool,
    filter: Filter,
    attributes: Vec<String>,
    sink: SearchSink,
    controls: Vec<Control>,
    follow_referrals: Option<bool>,
    response_timeout_ms: Option<u64>,
}

fn clamp_limit(limit: i64) -> i32 {
    limit.clamp(0, i64::from(i32::MAX)) as i32
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, scope: SearchScope, filter: Filter) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            deref_policy: DerefPolicy::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attributes: Vec::new(),
            sink: SearchSink::Collect,
            controls: Vec::new(),
            follow_referrals: None,
            response_timeout_ms: None,
        }
    }

    /// Same as [`SearchRequest::new`] with the filter given in string form.
    pub fn with_filter_str(
        base_dn: impl Into<String>,
        scope: SearchScope,
        filter: &str,
    ) -> Result<Self, LdapError> {
        Ok(Self::new(base_dn, scope, Filter::parse(filter)?))
    }

    /// A request whose entries and references are streamed to `listener`
    /// instead of being collected into the result.
    pub fn with_listener(
        listener: Arc<dyn SearchResultListener>,
        base_dn: impl Into<String>,
        scope: SearchScope,
        filter: Filter,
    ) -> Self {
        let mut request = Self::new(base_dn, scope, filter);
        request.sink = SearchSink::Stream(listener);
        request
    }

    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    pub fn set_base_dn(&mut self, base_dn: impl Into<String>) {
        self.base_dn = base_dn.into();
    }

    pub fn scope(&self) -> SearchScope {
        self.scope
    }

    pub fn set_scope(&mut self, scope: SearchScope) {
        self.scope = scope;
    }

    pub fn deref_policy(&self) -> DerefPolicy {
        self.deref_policy
    }

    pub fn set_deref_policy(&mut self, policy: DerefPolicy) {
        self.deref_policy = policy;
    }

    pub fn size_limit(&self) -> i32 {
        self.size_limit
    }

    /// Negative values are stored as 0 (no limit).
    pub fn set_size_limit(&mut self, limit: i64) {
        self.size_limit = clamp_limit(limit);
    }

    pub fn time_limit_seconds(&self) -> i32 {
        self.time_limit
    }

    /// Negative values are stored as 0 (no limit).
    pub fn set_time_limit_seconds(&mut self, limit: i64) {
        self.time_limit = clamp_limit(limit);
    }

    pub fn types_only(&self) -> bool {
        self.types_only
    }

    pub fn set_types_only(&mut self, types_only: bool) {
        self.types_only = types_only;
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    pub fn set_filter_str(&mut self, filter: &str) -> Result<(), LdapError> {
        self.filter = Filter::parse(filter)?;
        Ok(())
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// `None` is stored as the empty list, which means all user attributes.
    pub fn set_attributes(&mut self, attributes: Option<Vec<String>>) {
        self.attributes = attributes.unwrap_or_default();
    }

    pub fn sink(&self) -> &SearchSink {
        &self.sink
    }

    pub fn listener(&self) -> Option<&Arc<dyn SearchResultListener>> {
        match &self.sink {
            SearchSink::Stream(l) => Some(l),
            SearchSink::Collect => None,
        }
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn add_control(&mut self, control: Control) {
        self.controls.push(control);
    }

    pub fn set_controls(&mut self, controls: Vec<Control>) {
        self.controls = controls;
    }

    pub fn follow_referrals(&self) -> Option<bool> {
        self.follow_referrals
    }

    pub fn set_follow_referrals(&mut self, follow: Option<bool>) {
        self.follow_referrals = follow;
    }

    pub fn response_timeout_ms(&self) -> Option<u64> {
        self.response_timeout_ms
    }

    pub fn set_response_timeout_ms(&mut self, timeout_ms: Option<u64>) {
        self.response_timeout_ms = timeout_ms;
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Copy with a replaced control list; every other field is kept.
    pub fn duplicate_with_controls(&self, controls: Vec<Control>) -> Self {
        let mut copy = self.clone();
        copy.controls = controls;
        copy
    }

    /// Request to re-issue against a referral target. Base, scope and filter
    /// come from the URL when it provides them.
    pub fn derive_for_referral(&self, url: &LdapUrl) -> Self {
        let mut derived = self.clone();
        if let Some(base) = &url.base_dn {
            derived.base_dn = base.clone();
        }
        if let Some(scope) = url.scope {
            derived.scope = scope;
        }
        if let Some(filter) = &url.filter {
            derived.filter = filter.clone();
        }
        derived
    }

    /// Decode a SearchRequest protocol op. The result always collects.
    pub fn decode(content: &[u8], controls: Vec<Control>) -> Result<Self, LdapError> {
        let mut reader = BerReader::new(content);
        let base_dn = reader.read_string()?;
        let scope_value = reader.read_enumerated()?;
        let scope = SearchScope::from_int(scope_value)
            .ok_or_else(|| LdapError::Decoding(format!("invalid search scope {scope_value}")))?;
        let deref_value = reader.read_enumerated()?;
        let deref_policy = DerefPolicy::from_int(deref_value)
            .ok_or_else(|| LdapError::Decoding(format!("invalid deref policy {deref_value}")))?;
        let size_limit = clamp_limit(reader.read_integer()?);
        let time_limit = clamp_limit(reader.read_integer()?);
        let types_only = reader.read_boolean()?;
        let (filter_type, filter_content) = reader.read_element()?;
        let filter = Filter::decode(filter_type, filter_content)?;
        let mut attrs = reader.read_sequence(tag::SEQUENCE)?;
        let mut attributes = Vec::new();
        while attrs.has_remaining() {
            attributes.push(attrs.read_string()?);
        }
        Ok(Self {
            base_dn,
            scope,
            deref_policy,
            size_limit,
            time_limit,
            types_only,
            filter,
            attributes,
            sink: SearchSink::Collect,
            controls,
            follow_referrals: None,
            response_timeout_ms: None,
        })
    }
}

impl ProtocolOp for SearchRequest {
    fn protocol_op_type(&self) -> u8 {
        op::SEARCH_REQUEST
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(op::SEARCH_REQUEST);
        writer.add_octet_string(&self.base_dn);
        writer.add_enumerated(self.scope.int_value());
        writer.add_enumerated(self.deref_policy.int_value());
        writer.add_integer(i64::from(self.size_limit));
        writer.add_integer(i64::from(self.time_limit));
        writer.add_boolean(self.types_only);
        self.filter.write_to(writer);
        let attrs = writer.begin_sequence(tag::SEQUENCE);
        for a in &self.attributes {
            writer.add_octet_string(a);
        }
        writer.end_sequence(attrs);
        writer.end_sequence(seq);
    }
}

impl fmt::Display for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SearchRequest(baseDN='{}', scope={}, deref={}, sizeLimit={}, timeLimit={}, filter='{}', attrs={{{}}}",
            self.base_dn,
            self.scope,
            self.deref_policy,
            self.size_limit,
            self.time_limit,
            self.filter,
            self.attributes.join(", ")
        )?;
        if !self.controls.is_empty() {
            let controls: Vec<String> = self.controls.iter().map(ToString::to_string).collect();
            write!(f, ", controls={{{}}}", controls.join(", "))?;
        }
        f.write_str(")")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub entry: Entry,
    pub controls: Vec<Control>,
}

impl SearchResultEntry {
    pub fn new(entry: Entry) -> Self {
        Self {
            entry,
            controls: Vec::new(),
        }
    }

    pub fn dn(&self) -> &str {
        &self.entry.dn
    }

    pub fn decode(content: &[u8], controls: Vec<Control>) -> Result<Self, LdapError> {
        let mut reader = BerReader::new(content);
        let dn = reader.read_string()?;
        let mut attrs = reader.read_sequence(tag::SEQUENCE)?;
        let mut attributes = Vec::new();
        while attrs.has_remaining() {
            let mut attr = attrs.read_sequence(tag::SEQUENCE)?;
            let name = attr.read_string()?;
            let mut set = attr.read_sequence(tag::SET)?;
            let mut attribute = Attribute::new(name, Vec::<String>::new());
            while set.has_remaining() {
                attribute.push_raw(set.read_octet_string()?.to_vec());
            }
            attributes.push(attribute);
        }
        Ok(Self {
            entry: Entry { dn, attributes },
            controls,
        })
    }
}

impl ProtocolOp for SearchResultEntry {
    fn protocol_op_type(&self) -> u8 {
        op::SEARCH_RESULT_ENTRY
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(op::SEARCH_RESULT_ENTRY);
        writer.add_octet_string(&self.entry.dn);
        let attrs = writer.begin_sequence(tag::SEQUENCE);
        for attr in &self.entry.attributes {
            let a = writer.begin_sequence(tag::SEQUENCE);
            writer.add_octet_string(&attr.name);
            let set = writer.begin_sequence(tag::SET);
            for v in attr.raw_values() {
                writer.add_octet_string(v);
            }
            writer.end_sequence(set);
            writer.end_sequence(a);
        }
        writer.end_sequence(attrs);
        writer.end_sequence(seq);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResultReference {
    pub urls: Vec<String>,
    pub controls: Vec<Control>,
}

impl SearchResultReference {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            controls: Vec::new(),
        }
    }

    pub fn decode(content: &[u8], controls: Vec<Control>) -> Result<Self, LdapError> {
        let mut reader = BerReader::new(content);
        let mut urls = Vec::new();
        while reader.has_remaining() {
            urls.push(reader.read_string()?);
        }
        Ok(Self { urls, controls })
    }
}

impl ProtocolOp for SearchResultReference {
    fn protocol_op_type(&self) -> u8 {
        op::SEARCH_RESULT_REFERENCE
    }

    fn write_to(&self, writer: &mut BerWriter) {
        let seq = writer.begin_sequence(op::SEARCH_RESULT_REFERENCE);
        for url in &self.urls {
            writer.add_octet_string(url);
        }
        writer.end_sequence(seq);
    }
}

/// Final outcome of one top-level search invocation. Counts include units
/// delivered to a streaming listener; the lists are only present when the
/// request collected.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    message_id: i32,
    result: LdapResult,
    entry_count: usize,
    reference_count: usize,
    entries: Option<Vec<SearchResultEntry>>,
    references: Option<Vec<SearchResultReference>>,
}

impl SearchResult {
    pub(crate) fn from_parts(
        message_id: i32,
        result: LdapResult,
        entry_count: usize,
        reference_count: usize,
        entries: Option<Vec<SearchResultEntry>>,
        references: Option<Vec<SearchResultReference>>,
    ) -> Self {
        Self {
            message_id,
            result,
            entry_count,
            reference_count,
            entries,
            references,
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        LdapResult,
        usize,
        usize,
        Option<Vec<SearchResultEntry>>,
        Option<Vec<SearchResultReference>>,
    ) {
        (
            self.result,
            self.entry_count,
            self.reference_count,
            self.entries,
            self.references,
        )
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn result(&self) -> &LdapResult {
        &self.result
    }

    pub fn result_code(&self) -> ResultCode {
        self.result.result_code
    }

    pub fn matched_dn(&self) -> Option<&str> {
        self.result.matched_dn.as_deref()
    }

    pub fn diagnostic_message(&self) -> Option<&str> {
        self.result.diagnostic_message.as_deref()
    }

    pub fn referral_urls(&self) -> &[String] {
        &self.result.referral_urls
    }

    pub fn response_controls(&self) -> &[Control] {
        &self.result.response_controls
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    pub fn search_entries(&self) -> Option<&[SearchResultEntry]> {
        self.entries.as_deref()
    }

    pub fn search_references(&self) -> Option<&[SearchResultReference]> {
        self.references.as_deref()
    }

    /// Look up a collected entry by DN.
    pub fn search_entry(&self, dn: &str) -> Option<&SearchResultEntry> {
        let wanted = crate::entry::dn::normalize(dn);
        self.entries
            .as_ref()?
            .iter()
            .find(|e| crate::entry::dn::normalize(e.dn()) == wanted)
    }

    /// Classify into success or a typed failure.
    pub fn into_result(self) -> Result<SearchResult, LdapError> {
        match self.result.result_code {
            ResultCode::SUCCESS => Ok(self),
            ResultCode::REFERRAL_LIMIT_EXCEEDED => {
                Err(LdapError::ReferralLimitExceeded(Box::new(self)))
            }
            ResultCode::REFERRAL => Err(LdapError::ReferralUnresolvable(Box::new(self))),
            _ => Err(LdapError::Search(Box::new(self))),
        }
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SearchResult(messageID={}, {}, entriesReturned={}, referencesReturned={})",
            self.message_id, self.result, self.entry_count, self.reference_count
        )
    }
}
