mod pool;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool};
pub use state::{CredentialId, CredentialState, UnavailableReason};

use serde::{Deserialize, Serialize};

/// The only provider allowed a legitimately empty credential value. Vertex
/// authenticates via a service-account token carried out of band.
pub const VERTEX_PROVIDER: &str = "vertex";

/// Value string, list of supported models (empty = wildcard), weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub value: String,
    #[serde(default)]
    pub supported_models: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Credential {
    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.is_empty()
            || self.supported_models.iter().any(|m| m == model)
    }
}
