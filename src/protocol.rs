//! Shared protocol constants for the LDAP message layer

// Maximum encoded LDAPMessage size (16MB) - bounds memory used by one frame
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_LDAP_PORT: u16 = 389;
pub const DEFAULT_LDAPS_PORT: u16 = 636;

// Referral hops allowed before REFERRAL_LIMIT_EXCEEDED is synthesized
pub const DEFAULT_REFERRAL_HOP_LIMIT: u32 = 5;

// Capacity of the per-operation handoff queue between the connection reader
// and the waiting caller. A full queue blocks the reader for every operation
// on that connection.
pub const DEFAULT_RESPONSE_QUEUE_CAPACITY: usize = 50;

// Protocol op type tags (APPLICATION class). Numeric values are fixed by RFC 4511.
pub mod op {
    pub const BIND_REQUEST: u8 = 0x60;
    pub const BIND_RESPONSE: u8 = 0x61;
    pub const UNBIND_REQUEST: u8 = 0x42;
    pub const SEARCH_REQUEST: u8 = 0x63;
    pub const SEARCH_RESULT_ENTRY: u8 = 0x64;
    pub const SEARCH_RESULT_DONE: u8 = 0x65;
    pub const MODIFY_RESPONSE: u8 = 0x67;
    pub const ADD_RESPONSE: u8 = 0x69;
    pub const DELETE_RESPONSE: u8 = 0x6B;
    pub const MODIFY_DN_RESPONSE: u8 = 0x6D;
    pub const COMPARE_RESPONSE: u8 = 0x6F;
    pub const ABANDON_REQUEST: u8 = 0x50;
    pub const SEARCH_RESULT_REFERENCE: u8 = 0x73;
    pub const EXTENDED_REQUEST: u8 = 0x77;
    pub const EXTENDED_RESPONSE: u8 = 0x78;
}

// Context-specific tags used inside messages and results
pub mod ctx {
    pub const CONTROLS: u8 = 0xA0;
    pub const REFERRAL: u8 = 0xA3;
    pub const EXTENDED_REQUEST_OID: u8 = 0x80;
    pub const EXTENDED_REQUEST_VALUE: u8 = 0x81;
    pub const EXTENDED_RESPONSE_OID: u8 = 0x8A;
    pub const EXTENDED_RESPONSE_VALUE: u8 = 0x8B;
}

pub mod oid {
    // Unsolicited notification sent with message ID 0 before a server closes
    pub const NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";
    pub const WHO_AM_I: &str = "1.3.6.1.4.1.4203.1.11.3";
}

// Centralized timeout constants so the sync and async paths agree
pub mod timeouts {
    use std::time::Duration;

    // Default wait for each response unit (ms); 0 means wait forever
    pub const DEFAULT_RESPONSE_MS: u64 = 300_000;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 10_000;

    // A request-level override wins over the connection-level value
    pub fn effective_response_timeout_ms(request_ms: Option<u64>, connection_ms: u64) -> u64 {
        request_ms.unwrap_or(connection_ms)
    }

    // Convert a millisecond setting into a wait bound; 0 = no bound
    pub fn as_deadline(ms: u64) -> Option<Duration> {
        if ms == 0 {
            None
        } else {
            Some(Duration::from_millis(ms))
        }
    }
}
