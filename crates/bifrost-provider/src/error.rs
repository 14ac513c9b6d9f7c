use serde::{Deserialize, Serialize};

/// Typed errors at the provider-adapter boundary. Converted to the
/// wire-surface `BifrostError` exactly once, when the dispatcher hands an
/// outcome back to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("missing credential field: {0}")]
    MissingCredentialField(&'static str),
    /// A failed upstream call carrying the HTTP status it failed with, so the
    /// retry loop can classify it against `RETRYABLE_STATUSES`.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("{0}")]
    Other(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// The well-known `Type` value that short-circuits retry and fallback.
pub const ERROR_TYPE_REQUEST_CANCELLED: &str = "request_cancelled";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Cause", skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorDetail {
    /// "Structurally empty" means no type, no message, no cause. Status code
    /// lives on the enclosing `BifrostError`, checked there.
    pub fn is_structurally_empty(&self) -> bool {
        self.error_type.is_none() && self.message.is_empty() && self.cause.is_none()
    }
}

/// The wire-surface error structure. Every error surfaced to a caller
/// carries the provider tag that produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BifrostError {
    #[serde(rename = "IsBifrostError")]
    pub is_bifrost_error: bool,
    #[serde(rename = "StatusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "Error")]
    pub error: ErrorDetail,
    /// `None` is treated as "fallbacks allowed" (the default).
    #[serde(rename = "AllowFallbacks", skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
    #[serde(rename = "Provider")]
    pub provider: String,
}

/// HTTP statuses the retry loop and fallback cascade treat as
/// server-side/transient.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

impl BifrostError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_bifrost_error: false,
            status_code: None,
            error: ErrorDetail {
                error_type: None,
                message: message.into(),
                cause: None,
            },
            allow_fallbacks: None,
            provider: provider.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error.error_type = Some(error_type.into());
        self
    }

    pub fn infrastructural(mut self) -> Self {
        self.is_bifrost_error = true;
        self
    }

    pub fn no_fallbacks(mut self) -> Self {
        self.allow_fallbacks = Some(false);
        self
    }

    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::new(provider, "request cancelled")
            .with_type(ERROR_TYPE_REQUEST_CANCELLED)
            .no_fallbacks()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.error_type.as_deref() == Some(ERROR_TYPE_REQUEST_CANCELLED)
    }

    pub fn blocks_fallback(&self) -> bool {
        self.is_cancelled() || self.allow_fallbacks == Some(false)
    }

    /// Retryable when server-classified (not cancelled) and its status is in
    /// the retryable set.
    pub fn is_retryable(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.status_code {
            Some(status) => RETRYABLE_STATUSES.contains(&status),
            None => false,
        }
    }

    /// A "structurally empty" error loses to a present response during final
    /// reconciliation.
    pub fn is_structurally_empty(&self) -> bool {
        self.status_code.is_none() && self.error.is_structurally_empty()
    }

    pub fn stamp_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}

impl From<ProviderError> for BifrostError {
    fn from(err: ProviderError) -> Self {
        let infra = matches!(
            err,
            ProviderError::InvalidConfig(_) | ProviderError::Other(_)
        );
        let is_unsupported = matches!(err, ProviderError::Unsupported(_));
        let status = match &err {
            ProviderError::Upstream { status, .. } => Some(*status),
            _ => None,
        };
        let mut out = BifrostError::new("", err.to_string());
        if let Some(status) = status {
            out = out.with_status(status);
        }
        if infra {
            out = out.infrastructural();
        }
        if is_unsupported {
            out = out.with_type("unsupported").no_fallbacks();
        }
        out
    }
}
