//! Outbound proxy leasing
//!
//! When the proxy capability is enabled, a client leases one HTTP proxy from
//! the pool service before it becomes ready, and releases it on teardown.
//! A failed lease permanently disables that client; the worker process keeps
//! running.

use std::time::Duration;

use tracing::{error, info};

use crate::config::ProxyConfig;
use crate::error::{Result, WorkerError};

const LEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// A proxy held for the lifetime of one protocol client
#[derive(Debug, Clone)]
pub struct ProxyLease {
    pub proxy_url: String,
}

impl ProxyLease {
    /// Lease one HTTP proxy from the pool service
    pub async fn acquire(config: &ProxyConfig) -> Result<Self> {
        let url = format!("{}/get/?type=http", config.base_url);
        let client = reqwest::Client::new();
        let response = client
            .get(&url)
            .basic_auth(&config.username, Some(&config.password))
            .timeout(LEASE_TIMEOUT)
            .send()
            .await
            .map_err(|e| WorkerError::Protocol(format!("Failed to get proxy: {e}")))?
            .error_for_status()
            .map_err(|e| WorkerError::Protocol(format!("Failed to get proxy: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Protocol(format!("Invalid proxy response: {e}")))?;

        match body.get("proxy").and_then(|v| v.as_str()) {
            Some(proxy_url) => {
                info!(proxy = %proxy_url, "Proxy leased");
                Ok(Self {
                    proxy_url: proxy_url.to_string(),
                })
            }
            None => Err(WorkerError::Protocol(
                "Invalid proxy response format".to_string(),
            )),
        }
    }

    /// Return the lease to the pool. Errors are logged, not surfaced; the
    /// pool reclaims stale leases on its own.
    pub async fn release(&self, config: &ProxyConfig) {
        let url = format!("{}/delete/?proxy={}", config.base_url, self.proxy_url);
        let client = reqwest::Client::new();
        match client
            .get(&url)
            .basic_auth(&config.username, Some(&config.password))
            .timeout(LEASE_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(_) => info!(proxy = %self.proxy_url, "Proxy released"),
            Err(e) => error!(proxy = %self.proxy_url, error = %e, "Failed to release proxy"),
        }
    }
}
