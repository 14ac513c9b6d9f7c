use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProviderConfigError {
    #[error("missing required provider config field: {0}")]
    MissingField(&'static str),
    #[error("concurrency must be at least 1, got {0}")]
    ZeroConcurrency(usize),
}

/// Worker-pool sizing for one provider. Mirrors the Account capability's
/// `ConcurrencyAndBufferSize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyAndBufferSize {
    pub concurrency: usize,
    pub buffer_size: usize,
}

impl ConcurrencyAndBufferSize {
    pub fn validate(&self) -> Result<(), ProviderConfigError> {
        if self.concurrency == 0 {
            return Err(ProviderConfigError::ZeroConcurrency(self.concurrency));
        }
        Ok(())
    }
}

/// Exponential back-off parameters: base * multiplier^attempt, capped, with
/// additive full-jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            multiplier: 2.0,
            max: Duration::from_secs(2),
        }
    }
}

/// Transport-shaped config for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub max_retries: u32,
    pub default_request_timeout_sec: u64,
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            default_request_timeout_sec: 30,
            base_url: None,
            extra_headers: HashMap::new(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Per-provider configuration as read from the embedding application's Account
/// capability. `keyless = true` means the credential selector is skipped
/// entirely for this provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub concurrency_and_buffer_size: ConcurrencyAndBufferSize,
    pub network_config: NetworkConfig,
    #[serde(default)]
    pub keyless: bool,
    #[serde(default)]
    pub drop_excess_requests: bool,
    /// Provider-specific metadata (region, project id, deployment name, ...);
    /// opaque to the core, interpreted by the adapter.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ProviderConfigError> {
        self.concurrency_and_buffer_size.validate()
    }
}
