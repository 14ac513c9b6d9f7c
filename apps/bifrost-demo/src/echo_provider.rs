use async_trait::async_trait;

use bifrost_provider::{
    Credential, DeltaStream, Params, PostHookRunner, ProviderError, RequestContext, Response,
};

/// A mock adapter standing in for a real upstream (the actual HTTP
/// payload shaping for OpenAI/Anthropic/etc. is out of scope for this
/// crate). Echoes the request body back so the demo binary has something
/// concrete to dispatch through the full pipeline.
pub struct EchoProvider;

#[async_trait]
impl bifrost_provider::Provider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        model: &str,
        _credential: Option<&Credential>,
        input: &serde_json::Value,
        _params: &Params,
    ) -> Result<Response, ProviderError> {
        Ok(Response::new(serde_json::json!({
            "model": model,
            "echo": input,
            "trace_id": ctx.trace_id,
        })))
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &RequestContext,
        model: &str,
        _credential: Option<&Credential>,
        input: &serde_json::Value,
        _params: &Params,
        post_hook: PostHookRunner,
    ) -> Result<DeltaStream, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let model = model.to_string();
        let input = input.clone();
        tokio::spawn(async move {
            let delta = bifrost_provider::StreamElement::Delta(serde_json::json!({
                "model": model,
                "echo": input,
            }));
            let delta = post_hook(delta).await;
            if tx.send(delta).await.is_err() {
                return;
            }
            let terminal = post_hook(bifrost_provider::StreamElement::Terminal(None)).await;
            let _ = tx.send(terminal).await;
        });
        Ok(rx)
    }
}
