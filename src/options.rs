//! Connection-level configuration

use crate::logger::{NoopLogger, OperationLogger};
use crate::protocol::{timeouts, DEFAULT_REFERRAL_HOP_LIMIT, DEFAULT_RESPONSE_QUEUE_CAPACITY};
use crate::transport::ReferralConnector;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Wait per response unit in ms; 0 waits forever.
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub follow_referrals: bool,
    pub referral_hop_limit: u32,
    pub use_synchronous_mode: bool,
    /// Bound of each operation's handoff queue. When full, the connection
    /// reader blocks, stalling every operation on that connection.
    pub response_queue_capacity: usize,
    #[serde(skip)]
    pub referral_connector: Option<Arc<dyn ReferralConnector>>,
    #[serde(skip)]
    pub logger: Option<Arc<dyn OperationLogger>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            response_timeout_ms: timeouts::DEFAULT_RESPONSE_MS,
            connect_timeout_ms: timeouts::CONNECT_MS,
            follow_referrals: false,
            referral_hop_limit: DEFAULT_REFERRAL_HOP_LIMIT,
            use_synchronous_mode: false,
            response_queue_capacity: DEFAULT_RESPONSE_QUEUE_CAPACITY,
            referral_connector: None,
            logger: None,
        }
    }
}

impl ConnectionOptions {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let options: ConnectionOptions = toml::from_str(s).context("invalid connection options")?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read connection options {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("failed to load connection options {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.response_queue_capacity == 0 {
            bail!("response_queue_capacity must be at least 1");
        }
        Ok(())
    }

    /// Capacity actually used for handoff queues.
    pub fn queue_capacity(&self) -> usize {
        self.response_queue_capacity.max(1)
    }

    pub fn operation_logger(&self) -> Arc<dyn OperationLogger> {
        match &self.logger {
            Some(l) => Arc::clone(l),
            None => Arc::new(NoopLogger),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("follow_referrals", &self.follow_referrals)
            .field("referral_hop_limit", &self.referral_hop_limit)
            .field("use_synchronous_mode", &self.use_synchronous_mode)
            .field("response_queue_capacity", &self.response_queue_capacity)
            .field("referral_connector", &self.referral_connector.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = ConnectionOptions::default();
        assert_eq!(o.response_timeout_ms, 300_000);
        assert_eq!(o.connect_timeout_ms, 10_000);
        assert!(!o.follow_referrals);
        assert_eq!(o.referral_hop_limit, 5);
        assert!(!o.use_synchronous_mode);
        assert_eq!(o.response_queue_capacity, 50);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let o = ConnectionOptions::from_toml_str("follow_referrals = true\nreferral_hop_limit = 2\n").unwrap();
        assert!(o.follow_referrals);
        assert_eq!(o.referral_hop_limit, 2);
        assert_eq!(o.response_timeout_ms, 300_000);
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        assert!(ConnectionOptions::from_toml_str("response_queue_capacity = 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "use_synchronous_mode = true\nresponse_timeout_ms = 250\n").unwrap();
        let o = ConnectionOptions::load(&path).unwrap();
        assert!(o.use_synchronous_mode);
        assert_eq!(o.response_timeout_ms, 250);
        assert!(ConnectionOptions::load(&dir.path().join("missing.toml")).is_err());
    }
}
