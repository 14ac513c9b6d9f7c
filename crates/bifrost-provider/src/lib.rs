//! Provider-facing contracts for the request-routing core.
//!
//! This crate intentionally does not depend on any concrete HTTP client or
//! provider SDK. Provider implementations satisfy the `Provider` trait;
//! `bifrost-engine` is the only crate that drives it.

pub mod account;
pub mod credential;
pub mod error;
pub mod events;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod request;
pub mod response;

pub use account::{Account, AccountError, SharedAccount, StaticAccount};
pub use credential::{AcquireError, Credential, CredentialId, CredentialPool, CredentialState, UnavailableReason};
pub use error::{BifrostError, ErrorDetail, ProviderError, ProviderResult, RETRYABLE_STATUSES};
pub use events::{Event, EventHub, EventSink, OperationalEvent, TerminalEventSink};
pub use plugin::{Plugin, PreHookOutcome};
pub use provider::{Provider, RequestContext};
pub use registry::ProviderRegistry;
pub use request::{FallbackEntry, Input, Params, RequestEnvelope, ToolDescriptor};
pub use response::{DeltaSender, DeltaStream, PostHookRunner, Response, StreamElement};
