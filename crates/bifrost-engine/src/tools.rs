use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bifrost_provider::{RequestContext, RequestEnvelope, ToolDescriptor};

/// A remote tool server's connection details, opaque beyond a name. The
/// actual MCP transport is out of scope here.
#[derive(Debug, Clone)]
pub struct ToolClientConfig {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolManagerError {
    #[error("tool client {0} is already registered")]
    AlreadyRegistered(String),
    #[error("tool client {0} is not registered")]
    NotFound(String),
}

struct ToolClient {
    config: ToolClientConfig,
    tools: Vec<ToolDescriptor>,
}

/// The tool-server manager capability: injects discovered tool descriptors
/// into chat-shaped requests and exposes client lifecycle operations. Tool
/// execution is caller-driven; the caller gets tool-call deltas back in the
/// response and resubmits after invoking `execute_tool`.
#[async_trait]
pub trait ToolServerManager: Send + Sync {
    async fn add_client(&self, config: ToolClientConfig) -> Result<(), ToolManagerError>;
    async fn remove_client(&self, name: &str) -> Result<(), ToolManagerError>;
    async fn edit_client_tools(
        &self,
        name: &str,
        add: Vec<ToolDescriptor>,
        remove: Vec<String>,
    ) -> Result<(), ToolManagerError>;
    async fn reconnect_client(&self, name: &str) -> Result<(), ToolManagerError>;
    async fn get_clients(&self) -> Vec<ToolClientConfig>;

    /// Idempotent enrichment: merges the currently-available tool
    /// descriptors from every registered client into the request's
    /// parameters.
    async fn augment(&self, ctx: &RequestContext, req: RequestEnvelope) -> RequestEnvelope;

    /// Executes a tool call issued by a provider's response, returning a
    /// tool-result message for the caller to feed back in. Out of scope:
    /// the actual MCP wire call; this is a contract point for adapters built
    /// on top of this crate.
    async fn execute_tool(
        &self,
        ctx: &RequestContext,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolManagerError>;

    async fn cleanup(&self) -> Result<(), ToolManagerError>;
}

/// An in-memory tool-server manager holding discovered tool descriptors per
/// client. Connection/reconnection are no-ops beyond bookkeeping: the actual
/// MCP transport lives outside this crate.
pub struct InMemoryToolServerManager {
    clients: RwLock<HashMap<String, ToolClient>>,
}

impl InMemoryToolServerManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
        })
    }
}

impl Default for InMemoryToolServerManager {
    fn default() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ToolServerManager for InMemoryToolServerManager {
    async fn add_client(&self, config: ToolClientConfig) -> Result<(), ToolManagerError> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&config.name) {
            return Err(ToolManagerError::AlreadyRegistered(config.name));
        }
        clients.insert(
            config.name.clone(),
            ToolClient {
                config,
                tools: Vec::new(),
            },
        );
        Ok(())
    }

    async fn remove_client(&self, name: &str) -> Result<(), ToolManagerError> {
        self.clients
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ToolManagerError::NotFound(name.to_string()))
    }

    async fn edit_client_tools(
        &self,
        name: &str,
        add: Vec<ToolDescriptor>,
        remove: Vec<String>,
    ) -> Result<(), ToolManagerError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(name)
            .ok_or_else(|| ToolManagerError::NotFound(name.to_string()))?;
        client.tools.retain(|t| !remove.contains(&t.name));
        for tool in add {
            if !client.tools.iter().any(|t| t.name == tool.name) {
                client.tools.push(tool);
            }
        }
        Ok(())
    }

    async fn reconnect_client(&self, name: &str) -> Result<(), ToolManagerError> {
        let clients = self.clients.read().await;
        if clients.contains_key(name) {
            Ok(())
        } else {
            Err(ToolManagerError::NotFound(name.to_string()))
        }
    }

    async fn get_clients(&self) -> Vec<ToolClientConfig> {
        self.clients
            .read()
            .await
            .values()
            .map(|c| c.config.clone())
            .collect()
    }

    async fn augment(&self, _ctx: &RequestContext, mut req: RequestEnvelope) -> RequestEnvelope {
        let clients = self.clients.read().await;
        let discovered: Vec<ToolDescriptor> = clients
            .values()
            .flat_map(|c| c.tools.iter().cloned())
            .collect();
        req.params.merge_tools(discovered);
        req
    }

    async fn execute_tool(
        &self,
        _ctx: &RequestContext,
        tool_name: &str,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolManagerError> {
        let clients = self.clients.read().await;
        let owner = clients
            .values()
            .find(|c| c.tools.iter().any(|t| t.name == tool_name));
        match owner {
            Some(_) => Ok(serde_json::json!({"tool": tool_name, "result": null})),
            None => Err(ToolManagerError::NotFound(tool_name.to_string())),
        }
    }

    async fn cleanup(&self) -> Result<(), ToolManagerError> {
        self.clients.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_provider::{Input, Params};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> RequestContext {
        RequestContext::new("trace", CancellationToken::new())
    }

    fn req() -> RequestEnvelope {
        RequestEnvelope {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            input: Input::ChatCompletion(serde_json::json!({"messages": []})),
            params: Params::default(),
            fallbacks: vec![],
        }
    }

    #[tokio::test]
    async fn augment_merges_tools_from_all_clients_idempotently() {
        let manager = InMemoryToolServerManager::new();
        manager
            .add_client(ToolClientConfig {
                name: "fs".into(),
                endpoint: "stdio://fs".into(),
            })
            .await
            .unwrap();
        manager
            .edit_client_tools(
                "fs",
                vec![ToolDescriptor {
                    name: "read_file".into(),
                    description: "reads a file".into(),
                    schema: serde_json::json!({}),
                }],
                vec![],
            )
            .await
            .unwrap();

        let req = manager.augment(&ctx(), req()).await;
        assert_eq!(req.params.tools.len(), 1);

        let req = manager.augment(&ctx(), req).await;
        assert_eq!(req.params.tools.len(), 1, "augment must be idempotent");
    }

    #[tokio::test]
    async fn remove_client_drops_its_tools_from_future_augmentation() {
        let manager = InMemoryToolServerManager::new();
        manager
            .add_client(ToolClientConfig {
                name: "fs".into(),
                endpoint: "stdio://fs".into(),
            })
            .await
            .unwrap();
        manager
            .edit_client_tools(
                "fs",
                vec![ToolDescriptor {
                    name: "read_file".into(),
                    description: String::new(),
                    schema: serde_json::json!({}),
                }],
                vec![],
            )
            .await
            .unwrap();
        manager.remove_client("fs").await.unwrap();

        let req = manager.augment(&ctx(), req()).await;
        assert!(req.params.tools.is_empty());
    }

    #[tokio::test]
    async fn duplicate_client_registration_is_rejected() {
        let manager = InMemoryToolServerManager::new();
        manager
            .add_client(ToolClientConfig {
                name: "fs".into(),
                endpoint: "stdio://fs".into(),
            })
            .await
            .unwrap();
        let err = manager
            .add_client(ToolClientConfig {
                name: "fs".into(),
                endpoint: "stdio://fs".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolManagerError::AlreadyRegistered(_)));
    }
}
