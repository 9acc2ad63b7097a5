use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for sessions and fetches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Providers requested per lookup.
    pub provider_limit: usize,
    /// Upper bound on one provider lookup.
    pub provider_timeout_ms: u64,
    /// Unresolved wants older than this get a fresh provider lookup.
    pub requery_interval_ms: u64,
    /// Maximum lookups started per re-query tick.
    pub requery_batch: usize,
    /// Root lookups that must all come back empty before giving up.
    pub root_lookup_attempts: u32,
    pub root_retry_backoff_ms: u64,
    pub handshake_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// How long closing a session may wait on in-flight I/O.
    pub close_grace_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            provider_limit: 8,
            provider_timeout_ms: 5_000,
            requery_interval_ms: 1_000,
            requery_batch: 8,
            root_lookup_attempts: 3,
            root_retry_backoff_ms: 250,
            handshake_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            close_grace_ms: 2_000,
        }
    }
}

impl ExchangeConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn requery_interval(&self) -> Duration {
        Duration::from_millis(self.requery_interval_ms.max(1))
    }

    pub fn root_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.root_retry_backoff_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
