use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::events::{Event, EventHub, OperationalEvent};

use super::state::{CredentialId, CredentialState, UnavailableReason};
use super::unavailable_queue::{ModelUnavailableQueue, UnavailableQueue};
use super::{Credential, VERTEX_PROVIDER};

type ModelStateKey = (CredentialId, String);
type ModelStateValue = (Instant, UnavailableReason);

#[derive(Debug, Clone, thiserror::Error)]
pub enum AcquireError {
    #[error("provider {0} is not configured")]
    ProviderUnknown(String),
    #[error("no keys support model {model}")]
    NoKeysSupportModel { model: String },
}

/// Holds every credential registered for a provider and selects among them by
/// filtering to supported-model, then availability, then a weighted random
/// choice. Stateless from the caller's point of view (no locks are held
/// across an `acquire_for_model` call's return).
pub struct CredentialPool {
    creds: RwLock<HashMap<CredentialId, Credential>>,
    order: RwLock<Vec<CredentialId>>,
    states: Arc<RwLock<HashMap<CredentialId, CredentialState>>>,
    model_states: Arc<RwLock<HashMap<ModelStateKey, ModelStateValue>>>,
    events: EventHub,
    queue: Arc<UnavailableQueue>,
    model_queue: Arc<ModelUnavailableQueue>,
    provider: String,
}

impl CredentialPool {
    pub fn new(provider: impl Into<String>, events: EventHub) -> Self {
        let states = Arc::new(RwLock::new(HashMap::new()));
        let model_states = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(UnavailableQueue::new());
        let model_queue = Arc::new(ModelUnavailableQueue::new());
        queue
            .clone()
            .spawn_recover_task(states.clone(), events.clone());
        model_queue
            .clone()
            .spawn_recover_task(model_states.clone(), events.clone());
        Self {
            creds: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            states,
            model_states,
            events,
            queue,
            model_queue,
            provider: provider.into(),
        }
    }

    pub async fn insert(&self, id: CredentialId, cred: Credential) {
        self.creds.write().await.insert(id, cred);
        let mut order = self.order.write().await;
        if !order.contains(&id) {
            order.push(id);
        }
        self.states
            .write()
            .await
            .entry(id)
            .or_insert(CredentialState::Active);
    }

    pub async fn remove(&self, id: CredentialId) {
        self.creds.write().await.remove(&id);
        self.order.write().await.retain(|x| *x != id);
        self.states.write().await.remove(&id);
        self.model_states.write().await.retain(|(c, _), _| *c != id);
    }

    /// Selects a credential that supports `model`, honoring per-credential and
    /// per-(credential, model) unavailability windows. Empty `supported_models`
    /// on a candidate means wildcard; an empty value string is legitimate only
    /// for the Vertex provider.
    pub async fn acquire_for_model(
        &self,
        model: &str,
    ) -> Result<(CredentialId, Credential), AcquireError> {
        let order = self.order.read().await.clone();
        if order.is_empty() {
            return Err(AcquireError::ProviderUnknown(self.provider.clone()));
        }

        let creds = self.creds.read().await;
        let states = self.states.read().await;
        let model_states = self.model_states.read().await;
        let now = Instant::now();

        let mut candidates = Vec::new();
        for id in order {
            let Some(cred) = creds.get(&id) else {
                continue;
            };
            if !cred.supports_model(model) {
                continue;
            }
            if self.provider != VERTEX_PROVIDER && cred.value.is_empty() {
                continue;
            }
            if !matches!(states.get(&id), Some(CredentialState::Active)) {
                continue;
            }
            let key = (id, model.to_string());
            if let Some((until, _)) = model_states.get(&key) {
                if *until > now {
                    continue;
                }
            }
            candidates.push((id, cred.clone()));
        }
        drop(model_states);
        drop(states);
        drop(creds);

        if candidates.is_empty() {
            return Err(AcquireError::NoKeysSupportModel {
                model: model.to_string(),
            });
        }
        if candidates.len() == 1 {
            return Ok(candidates.into_iter().next().unwrap());
        }
        Ok(weighted_choice(candidates))
    }

    pub async fn mark_unavailable(
        &self,
        credential_id: CredentialId,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let until = Instant::now() + duration;
        self.states.write().await.insert(
            credential_id,
            CredentialState::Unavailable { until, reason },
        );
        self.queue.push(until, credential_id).await;
        self.events
            .emit(Event::Operational(OperationalEvent::CredentialUnavailable {
                credential_id,
                reason,
            }))
            .await;
    }

    pub async fn mark_model_unavailable(
        &self,
        credential_id: CredentialId,
        model: impl Into<String>,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let model = model.into();
        let until = Instant::now() + duration;
        self.model_states
            .write()
            .await
            .insert((credential_id, model.clone()), (until, reason));
        self.model_queue.push(until, credential_id, model.clone()).await;
        self.events
            .emit(Event::Operational(OperationalEvent::ModelUnavailable {
                credential_id,
                model,
                reason,
            }))
            .await;
    }

    pub async fn is_empty(&self) -> bool {
        self.order.read().await.is_empty()
    }
}

/// Weighted random selection: sum weights scaled to integers, pick a
/// uniform integer in [0, sum), walk candidates accumulating until the running
/// sum exceeds the pick.
fn weighted_choice(candidates: Vec<(CredentialId, Credential)>) -> (CredentialId, Credential) {
    let total: u64 = candidates.iter().map(|(_, c)| c.weight.max(1) as u64).sum();
    let pick = if total == 0 {
        0
    } else {
        rand::random::<u64>() % total
    };
    let mut acc = 0u64;
    for (id, cred) in &candidates {
        acc += cred.weight.max(1) as u64;
        if acc > pick {
            return (*id, cred.clone());
        }
    }
    candidates.into_iter().next_back().expect("non-empty candidates")
}
