//! Per-connection operation counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ConnectionStatistics {
    connects: AtomicU64,
    disconnects: AtomicU64,
    search_requests: AtomicU64,
    search_responses: AtomicU64,
    search_entries: AtomicU64,
    search_references: AtomicU64,
    search_response_nanos: AtomicU64,
    extended_requests: AtomicU64,
    extended_responses: AtomicU64,
    extended_response_nanos: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub connects: u64,
    pub disconnects: u64,
    pub search_requests: u64,
    pub search_responses: u64,
    pub search_entries: u64,
    pub search_references: u64,
    pub search_response_millis: u64,
    pub extended_requests: u64,
    pub extended_responses: u64,
    pub extended_response_millis: u64,
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl ConnectionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_connects(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_disconnects(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_search_requests(&self) {
        self.search_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_search_responses(&self, entries: usize, references: usize, elapsed: Duration) {
        self.search_responses.fetch_add(1, Ordering::Relaxed);
        self.search_entries.fetch_add(entries as u64, Ordering::Relaxed);
        self.search_references.fetch_add(references as u64, Ordering::Relaxed);
        self.search_response_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn increment_extended_requests(&self) {
        self.extended_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_extended_responses(&self, elapsed: Duration) {
        self.extended_responses.fetch_add(1, Ordering::Relaxed);
        self.extended_response_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            search_requests: self.search_requests.load(Ordering::Relaxed),
            search_responses: self.search_responses.load(Ordering::Relaxed),
            search_entries: self.search_entries.load(Ordering::Relaxed),
            search_references: self.search_references.load(Ordering::Relaxed),
            search_response_millis: self.search_response_nanos.load(Ordering::Relaxed) / 1_000_000,
            extended_requests: self.extended_requests.load(Ordering::Relaxed),
            extended_responses: self.extended_responses.load(Ordering::Relaxed),
            extended_response_millis: self.extended_response_nanos.load(Ordering::Relaxed) / 1_000_000,
        }
    }
}
