use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BifrostError;

/// A non-streaming response: opaque JSON body, shaped by the adapter.
/// Payload shaping/parsing is out of scope for this core; the engine only
/// ever moves this value around, never inspects its fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub body: serde_json::Value,
}

impl Response {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// One incremental element of a streaming response: either a fragment or the
/// terminal error. The stream closes after the terminal element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamElement {
    Delta(serde_json::Value),
    Terminal(Option<BifrostError>),
}

impl StreamElement {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamElement::Terminal(_))
    }
}

/// Bounded channel the adapter owns and closes. Streaming deltas are a lazy,
/// finite, non-restartable sequence.
pub type DeltaStream = tokio::sync::mpsc::Receiver<StreamElement>;
pub type DeltaSender = tokio::sync::mpsc::Sender<StreamElement>;

/// Invoked by the adapter exactly once per element so post-hooks can
/// mutate/observe streamed output without the adapter knowing about plugins.
/// Returns a future since `Plugin::post_hook` is itself async.
pub type PostHookRunner =
    Arc<dyn Fn(StreamElement) -> Pin<Box<dyn Future<Output = StreamElement> + Send>> + Send + Sync>;
