use serde::{Deserialize, Serialize};

/// The eight request shapes the engine admits, named exactly as the dispatcher's
/// public entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    TextCompletion,
    ChatCompletion,
    ChatCompletionStream,
    Embedding,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
}

impl RequestKind {
    /// Streaming kinds deliver a stream sink instead of a single result.
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            RequestKind::ChatCompletionStream
                | RequestKind::SpeechStream
                | RequestKind::TranscriptionStream
        )
    }

    /// Tool augmentation applies to every kind except embedding and speech,
    /// which never carry chat-shaped tool calls.
    pub fn allows_tool_augmentation(self) -> bool {
        !matches!(
            self,
            RequestKind::Embedding | RequestKind::Speech | RequestKind::SpeechStream
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::TextCompletion => "text_completion",
            RequestKind::ChatCompletion => "chat_completion",
            RequestKind::ChatCompletionStream => "chat_completion_stream",
            RequestKind::Embedding => "embedding",
            RequestKind::Speech => "speech",
            RequestKind::SpeechStream => "speech_stream",
            RequestKind::Transcription => "transcription",
            RequestKind::TranscriptionStream => "transcription_stream",
        }
    }
}
