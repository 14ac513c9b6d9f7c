use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use bifrost_common::RequestKind;
use bifrost_provider::{BifrostError, PostHookRunner, RequestContext, Response, StreamElement};

use crate::retry::with_retry;
use crate::state::{Admission, Engine};

/// How long a worker waits to hand an outcome to a caller that may have
/// disappeared. A 5-second write deadline guarantees progress even if the
/// dispatcher has disappeared.
const PUBLISH_DEADLINE: Duration = Duration::from_secs(5);

/// Spawns one worker task pulling from `queue_rx` until the queue closes.
/// The handle is kept by the owning `ProviderRuntime` so hot reconfiguration
/// can wait for it to drain in-flight work.
pub fn spawn_worker(
    engine: Arc<Engine>,
    provider: String,
    queue_rx: async_channel::Receiver<Admission>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(admission) = queue_rx.recv().await {
            process_admission(&engine, &provider, admission).await;
        }
        tracing::debug!(provider = %provider, "worker exiting: queue closed");
    })
}

async fn process_admission(engine: &Arc<Engine>, provider: &str, admission: Admission) {
    let ctx = RequestContext::new(admission.trace_id.clone(), admission.cancellation.clone());

    let config = match engine.account.config_for_provider(provider).await {
        Ok(config) => config,
        Err(err) => {
            publish_error(&admission, BifrostError::new(provider, err.to_string())).await;
            return;
        }
    };

    let credential = if config.keyless {
        None
    } else {
        let pool = match engine.credential_pool(&ctx, provider).await {
            Ok(pool) => pool,
            Err(err) => {
                publish_error(&admission, err).await;
                return;
            }
        };
        match pool.acquire_for_model(&admission.envelope.model).await {
            Ok((_, cred)) => Some(cred),
            Err(err) => {
                publish_error(
                    &admission,
                    BifrostError::new(provider, err.to_string()).with_type("no_credential"),
                )
                .await;
                return;
            }
        }
    };

    let Some(adapter) = engine.registry.get(provider) else {
        publish_error(
            &admission,
            BifrostError::new(provider, format!("provider {provider} is not registered"))
                .with_type("provider_not_configured"),
        )
        .await;
        return;
    };

    let backoff = config.network_config.backoff;
    let max_retries = config.network_config.max_retries;

    if admission.kind.is_streaming() {
        let post_hook = admission.post_hook.clone();
        let outcome = with_retry(max_retries, &backoff, &admission.cancellation, |attempt| {
            let mut ctx = ctx.clone();
            ctx.attempt_no = attempt;
            let adapter = adapter.clone();
            let credential = credential.clone();
            let envelope = &admission.envelope;
            let post_hook = post_hook.clone().unwrap_or_else(identity_post_hook);
            async move {
                dispatch_stream(
                    adapter.as_ref(),
                    &ctx,
                    admission.kind,
                    envelope,
                    credential.as_ref(),
                    post_hook,
                )
                .await
            }
        })
        .await;

        match outcome {
            Ok(stream) => publish_stream(&admission, stream).await,
            Err(err) => publish_error(&admission, err.stamp_provider(provider)).await,
        }
        return;
    }

    let outcome = with_retry(max_retries, &backoff, &admission.cancellation, |attempt| {
        let mut ctx = ctx.clone();
        ctx.attempt_no = attempt;
        let adapter = adapter.clone();
        let credential = credential.clone();
        let envelope = &admission.envelope;
        async move { dispatch_once(adapter.as_ref(), &ctx, admission.kind, envelope, credential.as_ref()).await }
    })
    .await;

    match outcome {
        Ok(resp) => publish_result(&admission, resp).await,
        Err(err) => publish_error(&admission, err.stamp_provider(provider)).await,
    }
}

async fn dispatch_once(
    adapter: &dyn bifrost_provider::Provider,
    ctx: &RequestContext,
    kind: RequestKind,
    envelope: &bifrost_provider::RequestEnvelope,
    credential: Option<&bifrost_provider::Credential>,
) -> Result<Response, BifrostError> {
    let input = input_value(envelope);
    let params = &envelope.params;
    let result = match kind {
        RequestKind::TextCompletion => {
            adapter
                .text_completion(ctx, &envelope.model, credential, input, params)
                .await
        }
        RequestKind::ChatCompletion => {
            adapter
                .chat_completion(ctx, &envelope.model, credential, input, params)
                .await
        }
        RequestKind::Embedding => {
            adapter
                .embedding(ctx, &envelope.model, credential, input, params)
                .await
        }
        RequestKind::Speech => {
            adapter
                .speech(ctx, &envelope.model, credential, input, params)
                .await
        }
        RequestKind::Transcription => {
            adapter
                .transcription(ctx, &envelope.model, credential, input, params)
                .await
        }
        RequestKind::ChatCompletionStream
        | RequestKind::SpeechStream
        | RequestKind::TranscriptionStream => {
            unreachable!("streaming kinds are dispatched via dispatch_stream")
        }
    };
    result.map_err(BifrostError::from)
}

async fn dispatch_stream(
    adapter: &dyn bifrost_provider::Provider,
    ctx: &RequestContext,
    kind: RequestKind,
    envelope: &bifrost_provider::RequestEnvelope,
    credential: Option<&bifrost_provider::Credential>,
    post_hook: bifrost_provider::PostHookRunner,
) -> Result<bifrost_provider::DeltaStream, BifrostError> {
    let input = input_value(envelope);
    let params = &envelope.params;
    let result = match kind {
        RequestKind::ChatCompletionStream => {
            adapter
                .chat_completion_stream(ctx, &envelope.model, credential, input, params, post_hook)
                .await
        }
        RequestKind::SpeechStream => {
            adapter
                .speech_stream(ctx, &envelope.model, credential, input, params, post_hook)
                .await
        }
        RequestKind::TranscriptionStream => {
            adapter
                .transcription_stream(ctx, &envelope.model, credential, input, params, post_hook)
                .await
        }
        _ => unreachable!("non-streaming kinds are dispatched via dispatch_once"),
    };
    result.map_err(BifrostError::from)
}

fn input_value(envelope: &bifrost_provider::RequestEnvelope) -> &serde_json::Value {
    match &envelope.input {
        bifrost_provider::Input::TextCompletion(v)
        | bifrost_provider::Input::ChatCompletion(v)
        | bifrost_provider::Input::Embedding(v)
        | bifrost_provider::Input::Speech(v)
        | bifrost_provider::Input::Transcription(v) => v,
    }
}

/// Races the send against cancellation and the publish deadline so a worker
/// never blocks indefinitely on a caller that has disappeared.
async fn publish_result(admission: &Admission, response: Response) {
    tokio::select! {
        _ = admission.result_tx.send(response) => {}
        _ = admission.cancellation.cancelled() => {
            tracing::debug!("caller cancelled before result could be published");
        }
        _ = tokio::time::sleep(PUBLISH_DEADLINE) => {
            tracing::warn!("publish deadline exceeded delivering result; caller likely gone");
        }
    }
}

async fn publish_error(admission: &Admission, error: BifrostError) {
    tokio::select! {
        _ = admission.error_tx.send(error) => {}
        _ = admission.cancellation.cancelled() => {
            tracing::debug!("caller cancelled before error could be published");
        }
        _ = tokio::time::sleep(PUBLISH_DEADLINE) => {
            tracing::warn!("publish deadline exceeded delivering error; caller likely gone");
        }
    }
}

async fn publish_stream(admission: &Admission, stream: bifrost_provider::DeltaStream) {
    tokio::select! {
        _ = admission.stream_tx.send(stream) => {}
        _ = admission.cancellation.cancelled() => {
            tracing::debug!("caller cancelled before stream could be published");
        }
        _ = tokio::time::sleep(PUBLISH_DEADLINE) => {
            tracing::warn!("publish deadline exceeded delivering stream; caller likely gone");
        }
    }
}

/// A no-op post-hook runner for streaming admissions that were never handed
/// one (e.g. constructed outside the dispatcher in tests).
fn identity_post_hook() -> PostHookRunner {
    Arc::new(|element: StreamElement| -> Pin<Box<dyn Future<Output = StreamElement> + Send>> {
        Box::pin(async move { element })
    })
}
