use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub type CredentialId = u64;

#[derive(Debug, Clone)]
pub enum CredentialState {
    Active,
    Unavailable {
        until: Instant,
        reason: UnavailableReason,
    },
}

impl CredentialState {
    pub fn is_active(&self) -> bool {
        matches!(self, CredentialState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    RateLimit,
    Timeout,
    Upstream5xx,
    AuthInvalid,
    Manual,
}
