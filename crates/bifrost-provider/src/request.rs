use serde::{Deserialize, Serialize};

use bifrost_common::RequestKind;

/// Exactly one of these backs every admitted request. The eight
/// `RequestKind`s collapse onto five input shapes: the two streaming chat/
/// speech/transcription kinds reuse the same input as their non-streaming
/// counterpart and differ only in `RequestKind` and in which adapter method is
/// invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Input {
    TextCompletion(serde_json::Value),
    ChatCompletion(serde_json::Value),
    Embedding(serde_json::Value),
    Speech(serde_json::Value),
    Transcription(serde_json::Value),
}

impl Input {
    /// Validates that this input variant actually matches the requested kind.
    pub fn matches_kind(&self, kind: RequestKind) -> bool {
        matches!(
            (self, kind),
            (Input::TextCompletion(_), RequestKind::TextCompletion)
                | (Input::ChatCompletion(_), RequestKind::ChatCompletion)
                | (Input::ChatCompletion(_), RequestKind::ChatCompletionStream)
                | (Input::Embedding(_), RequestKind::Embedding)
                | (Input::Speech(_), RequestKind::Speech)
                | (Input::Speech(_), RequestKind::SpeechStream)
                | (Input::Transcription(_), RequestKind::Transcription)
                | (Input::Transcription(_), RequestKind::TranscriptionStream)
        )
    }
}

/// A tool descriptor as discovered from a remote tool server. Opaque
/// beyond name/description; the JSON schema and invocation plumbing live in
/// the tool-server manager, out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: serde_json::Value,
}

/// Optional request parameters, including tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    /// Provider-specific passthrough (temperature, top_p, ...); opaque to the
    /// core by design, since payload shaping is out of scope.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Params {
    /// Merges in tool descriptors without duplicating by name. Tool
    /// augmentation must be idempotent.
    pub fn merge_tools(&mut self, discovered: Vec<ToolDescriptor>) {
        for tool in discovered {
            if !self.tools.iter().any(|t| t.name == tool.name) {
                self.tools.push(tool);
            }
        }
    }
}

/// A (provider, model) pair tried after the primary fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub provider: String,
    pub model: String,
}

/// The request envelope: immutable from the dispatcher's view after
/// pre-hooks run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub provider: String,
    pub model: String,
    pub input: Input,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub fallbacks: Vec<FallbackEntry>,
}

impl RequestEnvelope {
    pub fn kind_input_is_valid(&self, kind: RequestKind) -> bool {
        self.input.matches_kind(kind)
    }
}
