//! Reachability check run before connecting.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Answers "is the network usable right now?"
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online when the endpoint host resolves.
pub struct DnsProbe {
    host: String,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ConnectivityProbe for DnsProbe {
    async fn is_online(&self) -> bool {
        let lookup = tokio::net::lookup_host((self.host.as_str(), 443));
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                debug!(host = %self.host, "lookup failed: {}", e);
                false
            }
            Err(_) => {
                debug!(host = %self.host, "lookup timed out");
                false
            }
        }
    }
}

/// Fixed answer, for tests and for skipping the check.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}
