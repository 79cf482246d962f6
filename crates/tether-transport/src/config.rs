//! Transport configuration.

use crate::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Whole-request timeout.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// TCP connect timeout.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Redirects followed before giving up.
    pub max_redirects: usize,
    /// Retry policy for refs discovery.
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: tether_protocol::client_agent(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
