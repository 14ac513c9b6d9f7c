use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bifrost_common::RequestKind;
use bifrost_provider::{BifrostError, DeltaStream, RequestContext, RequestEnvelope, Response};

use crate::fallback::{envelope_for_attempt, unconfigured_is_skippable, with_fallback, Attempt};
use crate::pipeline::{build_stream_post_hook_runner, run_post_hooks, run_pre_hooks, PreHookResult};
use crate::state::{provider_runtime, Admission, ChannelSet, Engine};

const TRACE_PREFIX: &str = "bifrost";

/// Errors the dispatcher can raise before a request is ever admitted.
/// Always converted to a `BifrostError` before reaching the caller so the
/// wire surface stays uniform.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("{kind:?} request carries input for a different kind")]
    InputKindMismatch { kind: RequestKind },
}

impl DispatchError {
    fn into_bifrost(self, provider: &str) -> BifrostError {
        match self {
            DispatchError::InputKindMismatch { kind } => {
                BifrostError::new(provider, format!("request input does not match kind {kind:?}"))
                    .with_type("validation")
                    .no_fallbacks()
            }
        }
    }
}

/// Caller-supplied request: the envelope plus an optional cancellation
/// token. A background token is substituted if the caller doesn't provide
/// one.
pub struct DispatchRequest {
    pub envelope: RequestEnvelope,
    pub cancellation: Option<CancellationToken>,
}

impl DispatchRequest {
    pub fn new(envelope: RequestEnvelope) -> Self {
        Self {
            envelope,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// The public entry point: one method per `RequestKind`, each composing tool
/// augmentation, the plugin pipeline, queue admission, and (for non-streaming
/// kinds) the fallback cascade.
pub struct Dispatcher {
    engine: Arc<Engine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn text_completion(&self, req: DispatchRequest) -> Result<Response, BifrostError> {
        self.dispatch(req, RequestKind::TextCompletion).await
    }

    pub async fn chat_completion(&self, req: DispatchRequest) -> Result<Response, BifrostError> {
        self.dispatch(req, RequestKind::ChatCompletion).await
    }

    pub async fn embedding(&self, req: DispatchRequest) -> Result<Response, BifrostError> {
        self.dispatch(req, RequestKind::Embedding).await
    }

    pub async fn speech(&self, req: DispatchRequest) -> Result<Response, BifrostError> {
        self.dispatch(req, RequestKind::Speech).await
    }

    pub async fn transcription(&self, req: DispatchRequest) -> Result<Response, BifrostError> {
        self.dispatch(req, RequestKind::Transcription).await
    }

    pub async fn chat_completion_stream(
        &self,
        req: DispatchRequest,
    ) -> Result<DeltaStream, BifrostError> {
        self.dispatch_stream(req, RequestKind::ChatCompletionStream).await
    }

    pub async fn speech_stream(&self, req: DispatchRequest) -> Result<DeltaStream, BifrostError> {
        self.dispatch_stream(req, RequestKind::SpeechStream).await
    }

    pub async fn transcription_stream(
        &self,
        req: DispatchRequest,
    ) -> Result<DeltaStream, BifrostError> {
        self.dispatch_stream(req, RequestKind::TranscriptionStream).await
    }

    async fn dispatch(
        &self,
        req: DispatchRequest,
        kind: RequestKind,
    ) -> Result<Response, BifrostError> {
        let provider = req.envelope.provider.clone();
        if !req.envelope.kind_input_is_valid(kind) {
            return Err(DispatchError::InputKindMismatch { kind }.into_bifrost(&provider));
        }

        let cancellation = req.cancellation.unwrap_or_default();
        let ctx = RequestContext::new(trace_id(), cancellation.clone());
        let mut envelope = req.envelope;

        if kind.allows_tool_augmentation() {
            if let Some(manager) = &self.engine.tool_manager {
                envelope = manager.augment(&ctx, envelope).await;
            }
        }

        let mut record = self.engine.pipeline_pool.acquire();
        let pre_outcome = run_pre_hooks(&self.engine.plugins, &ctx, envelope, &mut record).await;

        let (resp, err) = match pre_outcome {
            PreHookResult::ShortCircuit { response, error } => {
                run_post_hooks(&self.engine.plugins, &ctx, record.executed, response, error).await
            }
            PreHookResult::Proceed(envelope) => {
                let result = with_fallback(&envelope, |provider, model| {
                    let attempt_envelope = envelope_for_attempt(&envelope, provider, model);
                    let engine = self.engine.clone();
                    let ctx = ctx.clone();
                    async move {
                        admit_non_stream(&engine, attempt_envelope, kind, &ctx).await
                    }
                })
                .await;
                match result {
                    Ok(resp) => {
                        run_post_hooks(&self.engine.plugins, &ctx, record.executed, Some(resp), None).await
                    }
                    Err(err) => {
                        run_post_hooks(&self.engine.plugins, &ctx, record.executed, None, Some(err)).await
                    }
                }
            }
        };

        self.engine.pipeline_pool.release(record);
        match (resp, err) {
            (Some(resp), _) => Ok(resp),
            (None, Some(err)) => Err(err),
            (None, None) => Err(BifrostError::new(&provider, "no response and no error after pipeline")),
        }
    }

    async fn dispatch_stream(
        &self,
        req: DispatchRequest,
        kind: RequestKind,
    ) -> Result<DeltaStream, BifrostError> {
        let provider = req.envelope.provider.clone();
        if !req.envelope.kind_input_is_valid(kind) {
            return Err(DispatchError::InputKindMismatch { kind }.into_bifrost(&provider));
        }

        let cancellation = req.cancellation.unwrap_or_default();
        let ctx = RequestContext::new(trace_id(), cancellation.clone());
        let mut envelope = req.envelope;

        if kind.allows_tool_augmentation() {
            if let Some(manager) = &self.engine.tool_manager {
                envelope = manager.augment(&ctx, envelope).await;
            }
        }

        let mut record = self.engine.pipeline_pool.acquire();
        let pre_outcome = run_pre_hooks(&self.engine.plugins, &ctx, envelope, &mut record).await;

        let result = match pre_outcome {
            PreHookResult::ShortCircuit { response: _, error } => {
                // A short-circuit on a streaming request has no stream to hand
                // back, so it surfaces as the pre-stream error instead: the
                // caller awaits exactly one of a stream channel or a
                // pre-stream error, never both.
                let n = record.executed;
                self.engine.pipeline_pool.release(record);
                let (_, err) = run_post_hooks(&self.engine.plugins, &ctx, n, None, error).await;
                return Err(err.unwrap_or_else(|| BifrostError::new(&provider, "short-circuited with no response")));
            }
            PreHookResult::Proceed(envelope) => envelope,
        };

        let n = record.executed;
        self.engine.pipeline_pool.release(record);

        let post_hook = build_stream_post_hook_runner(self.engine.plugins.clone(), ctx.clone(), n);

        with_fallback(&result, |provider, model| {
            let attempt_envelope = envelope_for_attempt(&result, provider, model);
            let engine = self.engine.clone();
            let ctx = ctx.clone();
            let post_hook = post_hook.clone();
            async move { admit_stream(&engine, attempt_envelope, kind, &ctx, post_hook).await }
        })
        .await
    }
}

async fn admit_non_stream(
    engine: &Arc<Engine>,
    envelope: RequestEnvelope,
    kind: RequestKind,
    ctx: &RequestContext,
) -> Attempt<Response> {
    let runtime = match provider_runtime(engine, &envelope.provider).await {
        Ok(runtime) => runtime,
        Err(err) if unconfigured_is_skippable(&err) => {
            tracing::warn!(provider = %envelope.provider, "skipping unconfigured provider in fallback cascade");
            return Attempt::Failure(err);
        }
        Err(err) => return Attempt::Failure(err),
    };

    let mut result_chan = ChannelSet::<Response>::new();
    let mut error_chan = ChannelSet::<BifrostError>::new();
    let stream_chan = ChannelSet::<DeltaStream>::new();

    let admission = Admission {
        envelope,
        kind,
        cancellation: ctx.cancellation.clone(),
        trace_id: ctx.trace_id.clone(),
        result_tx: result_chan.sender(),
        error_tx: error_chan.sender(),
        stream_tx: stream_chan.sender(),
        post_hook: None,
    };

    if let Err(err) = admit(engine, runtime, admission, ctx).await {
        return Attempt::Failure(err);
    }

    tokio::select! {
        Some(resp) = result_chan.recv() => Attempt::Success(resp),
        Some(err) = error_chan.recv() => Attempt::Failure(err),
        _ = ctx.cancellation.cancelled() => Attempt::Failure(BifrostError::cancelled("")),
    }
}

async fn admit_stream(
    engine: &Arc<Engine>,
    envelope: RequestEnvelope,
    kind: RequestKind,
    ctx: &RequestContext,
    post_hook: bifrost_provider::PostHookRunner,
) -> Attempt<DeltaStream> {
    let runtime = match provider_runtime(engine, &envelope.provider).await {
        Ok(runtime) => runtime,
        Err(err) if unconfigured_is_skippable(&err) => {
            tracing::warn!(provider = %envelope.provider, "skipping unconfigured provider in fallback cascade");
            return Attempt::Failure(err);
        }
        Err(err) => return Attempt::Failure(err),
    };

    let result_chan = ChannelSet::<Response>::new();
    let mut error_chan = ChannelSet::<BifrostError>::new();
    let mut stream_chan = ChannelSet::<DeltaStream>::new();

    let admission = Admission {
        envelope,
        kind,
        cancellation: ctx.cancellation.clone(),
        trace_id: ctx.trace_id.clone(),
        result_tx: result_chan.sender(),
        error_tx: error_chan.sender(),
        stream_tx: stream_chan.sender(),
        post_hook: Some(post_hook),
    };

    if let Err(err) = admit(engine, runtime, admission, ctx).await {
        return Attempt::Failure(err);
    }

    tokio::select! {
        Some(stream) = stream_chan.recv() => Attempt::Success(stream),
        Some(err) = error_chan.recv() => Attempt::Failure(err),
        _ = ctx.cancellation.cancelled() => Attempt::Failure(BifrostError::cancelled("")),
    }
}

/// Admission policy: try a non-blocking send first; if the queue is full and
/// drop-excess is set, fail immediately; otherwise block on send or
/// cancellation. There is no separate timeout on the blocking path, so a
/// caller that never cancels waits until the queue has room.
async fn admit(
    engine: &Arc<Engine>,
    runtime: Arc<tokio::sync::RwLock<crate::state::ProviderRuntime>>,
    admission: Admission,
    ctx: &RequestContext,
) -> Result<(), BifrostError> {
    let provider = admission.envelope.provider.clone();
    let guard = runtime.read().await;
    match guard.queue_tx.try_send(admission) {
        Ok(()) => Ok(()),
        Err(async_channel::TrySendError::Full(admission)) => {
            if guard.drop_excess.load(std::sync::atomic::Ordering::Relaxed) {
                engine
                    .events()
                    .emit(bifrost_provider::Event::Operational(
                        bifrost_provider::OperationalEvent::AdmissionDropped {
                            provider: provider.clone(),
                        },
                    ))
                    .await;
                return Err(BifrostError::new(&provider, "queue full").with_type("admission_queue_full"));
            }
            tokio::select! {
                send_result = guard.queue_tx.send(admission) => {
                    send_result.map_err(|_| BifrostError::new(&provider, "provider queue closed"))
                }
                _ = ctx.cancellation.cancelled() => Err(BifrostError::cancelled("")),
            }
        }
        Err(async_channel::TrySendError::Closed(_)) => {
            Err(BifrostError::new(&provider, "provider queue closed"))
        }
    }
}

fn trace_id() -> String {
    format!("{TRACE_PREFIX}-{}", Uuid::new_v4())
}
