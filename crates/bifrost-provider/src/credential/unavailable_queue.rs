use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Instant, sleep_until};

use crate::events::{Event, EventHub, OperationalEvent};

use super::state::{CredentialId, CredentialState, UnavailableReason};

/// Min-heap of (deadline, credential) drained by a single background task that
/// flips expired entries back to `Active`. One instance per `CredentialPool`.
pub struct UnavailableQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, CredentialId)>>>,
    notify: Notify,
}

impl UnavailableQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, until: Instant, credential_id: CredentialId) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, credential_id)));
        }
        // Always notify: the background task re-computes the next deadline itself.
        self.notify.notify_one();
    }

    pub fn spawn_recover_task(
        self: Arc<Self>,
        states: Arc<RwLock<HashMap<CredentialId, CredentialState>>>,
        events: EventHub,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, id))| (*t, *id))
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some((deadline, _)) => sleep_until(deadline).await,
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, id))) = heap.peek().copied() {
                        if t > now {
                            break;
                        }
                        heap.pop();
                        due.push(id);
                    }
                }
                if due.is_empty() {
                    continue;
                }

                let mut guard = states.write().await;
                for id in due {
                    let should_recover = matches!(
                        guard.get(&id),
                        Some(CredentialState::Unavailable { until, .. }) if *until <= now
                    );
                    if should_recover {
                        guard.insert(id, CredentialState::Active);
                        events
                            .emit(Event::Operational(OperationalEvent::CredentialRecovered {
                                credential_id: id,
                            }))
                            .await;
                    }
                }
            }
        });
    }
}

type ModelStateKey = (CredentialId, String);
type ModelStateValue = (Instant, UnavailableReason);

/// Same discipline as `UnavailableQueue`, keyed by (credential, model) so one
/// credential can be parked for a single model without affecting the rest.
pub struct ModelUnavailableQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, CredentialId, String)>>>,
    notify: Notify,
}

impl ModelUnavailableQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, until: Instant, credential_id: CredentialId, model: String) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, credential_id, model)));
        }
        self.notify.notify_one();
    }

    pub fn spawn_recover_task(
        self: Arc<Self>,
        states: Arc<RwLock<HashMap<ModelStateKey, ModelStateValue>>>,
        events: EventHub,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, id, model))| (*t, *id, model.clone()))
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some((deadline, ..)) => sleep_until(deadline).await,
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, id, model))) = heap.peek().cloned() {
                        if t > now {
                            break;
                        }
                        heap.pop();
                        due.push((id, model));
                    }
                }
                if due.is_empty() {
                    continue;
                }

                let mut guard = states.write().await;
                for (id, model) in due {
                    let key = (id, model.clone());
                    let should_recover =
                        matches!(guard.get(&key), Some((until, _)) if *until <= now);
                    if should_recover {
                        guard.remove(&key);
                        events
                            .emit(Event::Operational(OperationalEvent::ModelRecovered {
                                credential_id: id,
                                model,
                            }))
                            .await;
                    }
                }
            }
        });
    }
}
