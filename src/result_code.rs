//! LDAP result codes
//!
//! Result codes form an open set: servers may return values this crate has
//! no name for, so the type is a newtype over the integer value rather than
//! a closed enum.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);
    pub const OPERATIONS_ERROR: Self = Self(1);
    pub const PROTOCOL_ERROR: Self = Self(2);
    pub const TIME_LIMIT_EXCEEDED: Self = Self(3);
    pub const SIZE_LIMIT_EXCEEDED: Self = Self(4);
    pub const COMPARE_FALSE: Self = Self(5);
    pub const COMPARE_TRUE: Self = Self(6);
    pub const REFERRAL: Self = Self(10);
    pub const ADMIN_LIMIT_EXCEEDED: Self = Self(11);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: Self = Self(12);
    pub const NO_SUCH_ATTRIBUTE: Self = Self(16);
    pub const NO_SUCH_OBJECT: Self = Self(32);
    pub const INVALID_DN_SYNTAX: Self = Self(34);
    pub const INSUFFICIENT_ACCESS_RIGHTS: Self = Self(50);
    pub const BUSY: Self = Self(51);
    pub const UNAVAILABLE: Self = Self(52);
    pub const UNWILLING_TO_PERFORM: Self = Self(53);
    pub const OTHER: Self = Self(80);

    // Client-side codes; never sent by a server
    pub const SERVER_DOWN: Self = Self(81);
    pub const LOCAL_ERROR: Self = Self(82);
    pub const ENCODING_ERROR: Self = Self(83);
    pub const DECODING_ERROR: Self = Self(84);
    pub const TIMEOUT: Self = Self(85);
    pub const FILTER_ERROR: Self = Self(87);
    pub const USER_CANCELED: Self = Self(88);
    pub const PARAM_ERROR: Self = Self(89);
    pub const CONNECT_ERROR: Self = Self(91);
    pub const NOT_SUPPORTED: Self = Self(92);
    pub const REFERRAL_LIMIT_EXCEEDED: Self = Self(97);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn int_value(self) -> u32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "success",
            1 => "operations error",
            2 => "protocol error",
            3 => "time limit exceeded",
            4 => "size limit exceeded",
            5 => "compare false",
            6 => "compare true",
            10 => "referral",
            11 => "admin limit exceeded",
            12 => "unavailable critical extension",
            16 => "no such attribute",
            32 => "no such object",
            34 => "invalid DN syntax",
            50 => "insufficient access rights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwilling to perform",
            80 => "other",
            81 => "server down",
            82 => "local error",
            83 => "encoding error",
            84 => "decoding error",
            85 => "timeout",
            87 => "filter error",
            88 => "user canceled",
            89 => "parameter error",
            91 => "connect error",
            92 => "not supported",
            97 => "referral limit exceeded",
            _ => "unknown",
        }
    }
}

impl Default for ResultCode {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}
