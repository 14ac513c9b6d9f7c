use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bifrost_common::ProviderConfig;

use crate::credential::Credential;
use crate::provider::RequestContext;

/// Errors surfaced by the Account capability. Distinct from
/// `ProviderError`/`BifrostError`; these describe a configuration-source
/// failure, not an adapter-call failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccountError {
    #[error("provider {0} is not configured")]
    ProviderNotConfigured(String),
    #[error("failed to load keys for provider {0}: {1}")]
    KeyLoadFailed(String, String),
}

/// The configuration-source capability: `GetConfiguredProviders`,
/// `GetConfigForProvider`, `GetKeysForProvider`. The embedding application
/// owns config-file loading and environment substitution; this crate only
/// consumes the finished, typed result.
#[async_trait]
pub trait Account: Send + Sync {
    async fn configured_providers(&self) -> Vec<String>;

    async fn config_for_provider(&self, provider: &str) -> Result<ProviderConfig, AccountError>;

    async fn keys_for_provider(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Vec<Credential>, AccountError>;
}

/// An in-memory `Account` backed by a fixed map, handed a finished config by
/// the embedding application. Sufficient for the demo binary and for tests;
/// a real deployment's Account typically also watches a config file or a
/// management API for changes.
pub struct StaticAccount {
    configs: RwLock<HashMap<String, ProviderConfig>>,
    keys: RwLock<HashMap<String, Vec<Credential>>>,
}

impl StaticAccount {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_provider(
        &self,
        provider: impl Into<String>,
        config: ProviderConfig,
        keys: Vec<Credential>,
    ) {
        let provider = provider.into();
        self.configs.write().await.insert(provider.clone(), config);
        self.keys.write().await.insert(provider, keys);
    }

    pub async fn remove_provider(&self, provider: &str) {
        self.configs.write().await.remove(provider);
        self.keys.write().await.remove(provider);
    }
}

impl Default for StaticAccount {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Account for StaticAccount {
    async fn configured_providers(&self) -> Vec<String> {
        self.configs.read().await.keys().cloned().collect()
    }

    async fn config_for_provider(&self, provider: &str) -> Result<ProviderConfig, AccountError> {
        self.configs
            .read()
            .await
            .get(provider)
            .cloned()
            .ok_or_else(|| AccountError::ProviderNotConfigured(provider.to_string()))
    }

    async fn keys_for_provider(
        &self,
        _ctx: &RequestContext,
        provider: &str,
    ) -> Result<Vec<Credential>, AccountError> {
        Ok(self.keys.read().await.get(provider).cloned().unwrap_or_default())
    }
}

pub type SharedAccount = Arc<dyn Account>;
