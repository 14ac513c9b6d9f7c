use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::credential::Credential;
use crate::error::ProviderError;
use crate::response::{DeltaStream, PostHookRunner, Response};

/// Per-call context handed to every adapter invocation. `attempt_no` starts at
/// 1 and increments only on a retried attempt.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub cancellation: CancellationToken,
    pub attempt_no: u32,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            trace_id: trace_id.into(),
            cancellation,
            attempt_no: 1,
        }
    }
}

/// The provider adapter capability. One implementation per upstream
/// (OpenAI, Anthropic, Bedrock, Azure OpenAI, Vertex, Cohere, Mistral, Ollama,
/// Groq, SGLang, ...), not implemented in this crate, which owns only the
/// contract and the engine that drives it.
///
/// Default methods return `Unsupported`, a permanent, non-retryable error, so
/// a partial adapter compiles without boilerplate.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn text_completion(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
    ) -> Result<Response, ProviderError> {
        Err(ProviderError::Unsupported("text_completion"))
    }

    async fn chat_completion(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
    ) -> Result<Response, ProviderError> {
        Err(ProviderError::Unsupported("chat_completion"))
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
        _post_hook: PostHookRunner,
    ) -> Result<DeltaStream, ProviderError> {
        Err(ProviderError::Unsupported("chat_completion_stream"))
    }

    async fn embedding(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
    ) -> Result<Response, ProviderError> {
        Err(ProviderError::Unsupported("embedding"))
    }

    async fn speech(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
    ) -> Result<Response, ProviderError> {
        Err(ProviderError::Unsupported("speech"))
    }

    async fn speech_stream(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
        _post_hook: PostHookRunner,
    ) -> Result<DeltaStream, ProviderError> {
        Err(ProviderError::Unsupported("speech_stream"))
    }

    async fn transcription(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
    ) -> Result<Response, ProviderError> {
        Err(ProviderError::Unsupported("transcription"))
    }

    async fn transcription_stream(
        &self,
        _ctx: &RequestContext,
        _model: &str,
        _credential: Option<&Credential>,
        _input: &serde_json::Value,
        _params: &crate::request::Params,
        _post_hook: PostHookRunner,
    ) -> Result<DeltaStream, ProviderError> {
        Err(ProviderError::Unsupported("transcription_stream"))
    }
}
