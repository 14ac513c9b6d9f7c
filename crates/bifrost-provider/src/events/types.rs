use serde::{Deserialize, Serialize};

use crate::credential::{CredentialId, UnavailableReason};

/// Structured operational events the engine emits for observability. These are
/// distinct from the wire-surface error taxonomy; a caller never sees
/// these directly, they exist for logs/dashboards/alerting sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Operational(OperationalEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    CredentialUnavailable {
        credential_id: CredentialId,
        reason: UnavailableReason,
    },
    CredentialRecovered {
        credential_id: CredentialId,
    },
    ModelUnavailable {
        credential_id: CredentialId,
        model: String,
        reason: UnavailableReason,
    },
    ModelRecovered {
        credential_id: CredentialId,
        model: String,
    },
    FallbackTaken {
        primary_provider: String,
        fallback_provider: String,
        fallback_model: String,
    },
    AdmissionDropped {
        provider: String,
    },
    ProviderReconfigured {
        provider: String,
        old_concurrency: usize,
        new_concurrency: usize,
        transferred: usize,
    },
}
