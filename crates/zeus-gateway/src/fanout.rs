//! Fanout: delivers each worker event to exactly the right clients.
//!
//! Delivery order for an event from worker `w` of provider `p`:
//! 1. affinity clients (`currentWorkerId == w`) get the frame as-is; a
//!    terminal event (`done`/`error`) clears their affinity,
//! 2. subscribers of `w` not already served get the wrapped
//!    `{type:"stream", source:"process", …}` envelope,
//! 3. subscribers of `p` not already served get the same wrapped shape
//!    with `source:"provider"`.
//!
//! The ordering deduplicates: a client never sees one event twice, and
//! affinity clients keep a clean request/response stream.
//!
//! Fanout also owns the subscription index. Forward maps (worker → clients,
//! provider → clients) and the per-client reverse sets live under one lock,
//! so the two views can never disagree.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::hub::ClientHub;
use zeus_core::{ClientId, Provider, WorkerId};
use zeus_proto::{is_terminal_event, GatewayEvent, StreamSource};

/// One event read off a worker's stream, tagged with its origin.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    pub worker_id: WorkerId,
    pub provider: Provider,
    pub worker_name: String,
    /// The event's `type` field
    pub event_type: String,
    /// The original frame, passed as-is to affinity clients
    pub raw: String,
    /// The event's payload, re-wrapped for subscribers
    pub payload: Value,
}

#[derive(Default)]
struct SubscriptionIndex {
    worker_subs: HashMap<WorkerId, HashSet<ClientId>>,
    provider_subs: HashMap<Provider, HashSet<ClientId>>,
    by_client: HashMap<ClientId, ClientSubs>,
}

#[derive(Default)]
struct ClientSubs {
    workers: HashSet<WorkerId>,
    providers: HashSet<Provider>,
}

/// The fanout layer: subscription index + delivery.
pub struct Fanout {
    hub: Arc<ClientHub>,
    index: RwLock<SubscriptionIndex>,
}

impl Fanout {
    pub fn new(hub: Arc<ClientHub>) -> Self {
        Self {
            hub,
            index: RwLock::new(SubscriptionIndex::default()),
        }
    }

    // =========================================================================
    // Subscription index
    // =========================================================================

    /// Subscribe a client to one worker's events.
    pub fn subscribe_worker(&self, client_id: &str, worker_id: &str) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index
            .worker_subs
            .entry(worker_id.to_string())
            .or_default()
            .insert(client_id.to_string());
        index
            .by_client
            .entry(client_id.to_string())
            .or_default()
            .workers
            .insert(worker_id.to_string());
    }

    /// Subscribe a client to a whole provider pool's events.
    pub fn subscribe_provider(&self, client_id: &str, provider: &str) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index
            .provider_subs
            .entry(provider.to_string())
            .or_default()
            .insert(client_id.to_string());
        index
            .by_client
            .entry(client_id.to_string())
            .or_default()
            .providers
            .insert(provider.to_string());
    }

    pub fn unsubscribe_worker(&self, client_id: &str, worker_id: &str) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = index.worker_subs.get_mut(worker_id) {
            subs.remove(client_id);
            if subs.is_empty() {
                index.worker_subs.remove(worker_id);
            }
        }
        if let Some(subs) = index.by_client.get_mut(client_id) {
            subs.workers.remove(worker_id);
        }
    }

    pub fn unsubscribe_provider(&self, client_id: &str, provider: &str) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = index.provider_subs.get_mut(provider) {
            subs.remove(client_id);
            if subs.is_empty() {
                index.provider_subs.remove(provider);
            }
        }
        if let Some(subs) = index.by_client.get_mut(client_id) {
            subs.providers.remove(provider);
        }
    }

    /// Remove every subscription a client holds. Used by `unsubscribe all`
    /// and on disconnect.
    pub fn remove_client(&self, client_id: &str) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = index.by_client.remove(client_id) {
            for worker_id in subs.workers {
                if let Some(set) = index.worker_subs.get_mut(&worker_id) {
                    set.remove(client_id);
                    if set.is_empty() {
                        index.worker_subs.remove(&worker_id);
                    }
                }
            }
            for provider in subs.providers {
                if let Some(set) = index.provider_subs.get_mut(&provider) {
                    set.remove(client_id);
                    if set.is_empty() {
                        index.provider_subs.remove(&provider);
                    }
                }
            }
        }
    }

    /// Drop all subscriptions to a worker that no longer exists.
    pub fn remove_worker(&self, worker_id: &str) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        if let Some(clients) = index.worker_subs.remove(worker_id) {
            for client_id in clients {
                if let Some(subs) = index.by_client.get_mut(&client_id) {
                    subs.workers.remove(worker_id);
                }
            }
        }
    }

    /// A client's current subscriptions: (worker ids, providers), sorted.
    pub fn subscriptions_of(&self, client_id: &str) -> (Vec<String>, Vec<String>) {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        match index.by_client.get(client_id) {
            Some(subs) => {
                let mut workers: Vec<String> = subs.workers.iter().cloned().collect();
                let mut providers: Vec<String> = subs.providers.iter().cloned().collect();
                workers.sort();
                providers.sort();
                (workers, providers)
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    fn subscribers(&self, worker_id: &str, provider: &str) -> (Vec<ClientId>, Vec<ClientId>) {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let workers = index
            .worker_subs
            .get(worker_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        let providers = index
            .provider_subs
            .get(provider)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        (workers, providers)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Deliver one worker event to its delivery set.
    pub fn deliver(&self, event: &WorkerEvent) {
        let mut served: HashSet<ClientId> = HashSet::new();

        // 1. Affinity clients receive the frame unwrapped.
        for client_id in self.hub.clients_bound_to(&event.worker_id) {
            self.hub.send_to(&client_id, &event.raw);
            if is_terminal_event(&event.event_type) {
                self.hub.clear_if_current(&client_id, &event.worker_id);
            }
            served.insert(client_id);
        }

        let (worker_subs, provider_subs) = self.subscribers(&event.worker_id, &event.provider);

        // 2. Worker subscribers not already served.
        if !worker_subs.is_empty() {
            let frame = self.wrapped(event, StreamSource::Process);
            for client_id in worker_subs {
                if served.insert(client_id.clone()) {
                    self.hub.send_to(&client_id, &frame);
                }
            }
        }

        // 3. Provider subscribers not already served.
        if !provider_subs.is_empty() {
            let frame = self.wrapped(event, StreamSource::Provider);
            for client_id in provider_subs {
                if served.insert(client_id.clone()) {
                    self.hub.send_to(&client_id, &frame);
                }
            }
        }

        debug!(
            worker_id = %event.worker_id,
            event = %event.event_type,
            delivered = served.len(),
            "worker event fanned out"
        );
    }

    fn wrapped(&self, event: &WorkerEvent, source: StreamSource) -> String {
        GatewayEvent::stream(
            source,
            &event.event_type,
            &event.payload,
            &event.provider,
            &event.worker_id,
            &event.worker_name,
        )
        .to_string()
    }
}
