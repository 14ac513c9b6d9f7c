use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use bifrost_common::ProviderConfig;
use bifrost_provider::{
    BifrostError, CredentialId, CredentialPool, DeltaStream, EventHub, Plugin, ProviderRegistry,
    RequestContext, Response, SharedAccount,
};

use crate::pool::Pool;
use crate::pipeline::PipelineRecord;
use crate::tools::ToolServerManager;

/// A reusable single-element channel pair: the dispatcher keeps both ends,
/// hands a clone of the sender to the worker, and drains any stale value on
/// acquisition rather than just on release.
pub struct ChannelSet<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
}

impl<T> ChannelSet<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Default for ChannelSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The channel message admitted into a provider's queue. Carries its own
/// outcome sinks so a worker can publish a result without knowing who is
/// awaiting it.
pub struct Admission {
    pub envelope: bifrost_provider::RequestEnvelope,
    pub kind: bifrost_common::RequestKind,
    pub cancellation: tokio_util::sync::CancellationToken,
    pub trace_id: String,
    pub result_tx: mpsc::Sender<Response>,
    pub error_tx: mpsc::Sender<BifrostError>,
    pub stream_tx: mpsc::Sender<DeltaStream>,
    pub post_hook: Option<bifrost_provider::PostHookRunner>,
}

/// Per-provider structural state. The queue is a bounded MPMC channel;
/// workers hold clones of the receiver and run until it closes
/// (`async_channel` closes when every sender drops or `.close()` is called
/// explicitly, so the queue is closed exactly once to stop its workers).
pub struct ProviderRuntime {
    pub queue_tx: async_channel::Sender<Admission>,
    pub queue_rx: async_channel::Receiver<Admission>,
    pub worker_handles: Vec<JoinHandle<()>>,
    pub drop_excess: Arc<AtomicBool>,
    pub buffer_size: usize,
    pub concurrency: usize,
}

impl ProviderRuntime {
    pub fn is_full(&self) -> bool {
        self.buffer_size != 0 && self.queue_tx.len() >= self.buffer_size
    }
}

/// Engine-wide configuration supplied by the embedding application at
/// construction time, as a typed `EngineConfig` object.
pub struct EngineConfig {
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub tool_manager: Option<Arc<dyn ToolServerManager>>,
    pub pipeline_pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            tool_manager: None,
            pipeline_pool_capacity: 256,
        }
    }
}

/// The engine instance: everything else lives on it. Owns provider
/// runtimes, credential pools, the plugin chain, and the event
/// hub; the `Dispatcher` (dispatcher.rs) is a thin public-facing wrapper
/// around a shared `Engine`.
pub struct Engine {
    pub(crate) account: SharedAccount,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) providers: RwLock<HashMap<String, Arc<RwLock<ProviderRuntime>>>>,
    pub(crate) credential_pools: RwLock<HashMap<String, Arc<CredentialPool>>>,
    pub(crate) plugins: Arc<[Arc<dyn Plugin>]>,
    pub(crate) pipeline_pool: Pool<PipelineRecord>,
    pub(crate) tool_manager: Option<Arc<dyn ToolServerManager>>,
    pub(crate) events: EventHub,
}

impl Engine {
    pub fn new(
        account: SharedAccount,
        registry: Arc<ProviderRegistry>,
        events: EventHub,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            account,
            registry,
            providers: RwLock::new(HashMap::new()),
            credential_pools: RwLock::new(HashMap::new()),
            plugins: Arc::from(config.plugins),
            pipeline_pool: Pool::new(config.pipeline_pool_capacity),
            tool_manager: config.tool_manager,
            events,
        })
    }

    pub fn events(&self) -> EventHub {
        self.events.clone()
    }

    /// Returns the provider's credential pool, loading it from the account's
    /// keys on first use. `worker.rs` calls this once per dispatched request,
    /// so a keyed provider's credentials are populated before the first
    /// acquire rather than left in a permanently empty pool.
    pub(crate) async fn credential_pool(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Arc<CredentialPool>, BifrostError> {
        if let Some(pool) = self.credential_pools.read().await.get(provider).cloned() {
            return Ok(pool);
        }
        let mut pools = self.credential_pools.write().await;
        if let Some(pool) = pools.get(provider) {
            return Ok(pool.clone());
        }
        let keys = self
            .account
            .keys_for_provider(ctx, provider)
            .await
            .map_err(|err| {
                BifrostError::new(provider, err.to_string()).with_type("provider_not_configured")
            })?;
        let pool = Arc::new(CredentialPool::new(provider, self.events.clone()));
        for (id, cred) in keys.into_iter().enumerate() {
            pool.insert(id as CredentialId, cred).await;
        }
        pools.insert(provider.to_string(), pool.clone());
        Ok(pool)
    }
}

/// Obtains the provider queue, creating it lazily under the map's write lock
/// if absent. Steady-state lookups only take the outer read lock plus
/// the per-provider read lock. A free function (not a method) because
/// spawning workers needs an owned `Arc<Engine>` to hand to each worker task,
/// and `&Arc<Self>` is not a receiver Rust lets inherent methods take.
pub(crate) async fn provider_runtime(
    engine: &Arc<Engine>,
    provider: &str,
) -> Result<Arc<RwLock<ProviderRuntime>>, BifrostError> {
    if let Some(existing) = engine.providers.read().await.get(provider).cloned() {
        return Ok(existing);
    }

    let config = engine
        .account
        .config_for_provider(provider)
        .await
        .map_err(|err| {
            BifrostError::new(provider, err.to_string()).with_type("provider_not_configured")
        })?;
    config
        .validate()
        .map_err(|err| BifrostError::new(provider, err.to_string()).with_type("invalid_config"))?;

    let mut providers = engine.providers.write().await;
    if let Some(existing) = providers.get(provider) {
        return Ok(existing.clone());
    }
    let runtime = spawn_runtime(engine, provider, &config);
    let handle = Arc::new(RwLock::new(runtime));
    providers.insert(provider.to_string(), handle.clone());
    Ok(handle)
}

pub(crate) fn spawn_runtime(
    engine: &Arc<Engine>,
    provider: &str,
    config: &ProviderConfig,
) -> ProviderRuntime {
    let sizing = config.concurrency_and_buffer_size;
    let (queue_tx, queue_rx) = async_channel::bounded(sizing.buffer_size.max(1));
    let drop_excess = Arc::new(AtomicBool::new(config.drop_excess_requests));
    let mut handles = Vec::with_capacity(sizing.concurrency);
    for _ in 0..sizing.concurrency {
        handles.push(crate::worker::spawn_worker(
            engine.clone(),
            provider.to_string(),
            queue_rx.clone(),
        ));
    }
    ProviderRuntime {
        queue_tx,
        queue_rx,
        worker_handles: handles,
        drop_excess,
        buffer_size: sizing.buffer_size,
        concurrency: sizing.concurrency,
    }
}
