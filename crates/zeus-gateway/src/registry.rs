//! Worker registry: the catalog of live workers.
//!
//! A map by id with a provider view, guarded by one `RwLock`. Reads return
//! cloned [`WorkerInfo`] snapshots, so callers always see a consistent
//! record of a single worker. Lifecycle transitions are emitted on a
//! broadcast channel; the gateway facade reacts to them in one place
//! (pool recompute, affinity clearing, subscription teardown).

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;

use zeus_core::{HealthState, LifecycleEvent, WorkerId, WorkerInfo, WorkerStatus};
use zeus_proto::WorkerHello;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Catalog of live workers keyed by id.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerInfo>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Register a freshly launched worker (status `starting`).
    pub fn insert(&self, info: WorkerInfo) {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        debug!(worker_id = %info.id, provider = %info.provider, "worker registered");
        workers.insert(info.id.clone(), info);
    }

    /// Snapshot of one worker.
    pub fn get(&self, id: &str) -> Option<WorkerInfo> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        workers.get(id).cloned()
    }

    /// Snapshot of all live workers, optionally filtered by provider.
    pub fn list(&self, provider: Option<&str>) -> Vec<WorkerInfo> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<WorkerInfo> = workers
            .values()
            .filter(|w| provider.map_or(true, |p| w.provider == p))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Healthy workers of a provider.
    pub fn healthy(&self, provider: &str) -> Vec<WorkerInfo> {
        self.list(Some(provider))
            .into_iter()
            .filter(WorkerInfo::is_selectable)
            .collect()
    }

    /// Distinct providers with at least one live worker.
    pub fn providers(&self) -> Vec<String> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        let mut providers: Vec<String> =
            workers.values().map(|w| w.provider.clone()).collect();
        providers.sort();
        providers.dedup();
        providers
    }

    /// Total live worker count.
    pub fn len(&self) -> usize {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a worker ready: `running`/`healthy`, with its first reported
    /// model. Emits `WorkerStarted`.
    pub fn mark_ready(&self, id: &str, model: Option<String>) -> Option<WorkerInfo> {
        let snapshot = {
            let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
            let worker = workers.get_mut(id)?;
            worker.status = WorkerStatus::Running;
            worker.health = HealthState::Healthy;
            if model.is_some() {
                worker.model = model;
            }
            worker.clone()
        };
        let _ = self.events.send(LifecycleEvent::Started(snapshot.clone()));
        Some(snapshot)
    }

    /// Record the identity fields from the worker's first stream frame.
    pub fn record_hello(&self, id: &str, hello: &WorkerHello) {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = workers.get_mut(id) {
            if let Some(name) = &hello.name {
                worker.name = name.clone();
            }
            if hello.model.is_some() {
                worker.model = hello.model.clone();
            }
            if !hello.available_models.is_empty() {
                worker.available_models = hello.available_models.clone();
            }
        }
    }

    /// Record a model change acknowledged by the worker.
    pub fn record_model(&self, id: &str, model: &str) {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = workers.get_mut(id) {
            worker.model = Some(model.to_string());
        }
    }

    /// Health transition: endpoint failing but process alive. Emits
    /// `WorkerFailed` when the worker was previously healthy.
    pub fn mark_degraded(&self, id: &str) -> Option<WorkerInfo> {
        let (was_healthy, snapshot) = {
            let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
            let worker = workers.get_mut(id)?;
            let was_healthy = worker.health.is_healthy();
            worker.status = WorkerStatus::Degraded;
            worker.health = HealthState::Unhealthy;
            (was_healthy, worker.clone())
        };
        if was_healthy {
            let _ = self.events.send(LifecycleEvent::Failed(snapshot.clone()));
        }
        Some(snapshot)
    }

    /// Health transition back to healthy after a degraded spell.
    pub fn mark_recovered(&self, id: &str) -> Option<WorkerInfo> {
        let snapshot = {
            let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
            let worker = workers.get_mut(id)?;
            worker.status = WorkerStatus::Running;
            worker.health = HealthState::Healthy;
            worker.clone()
        };
        let _ = self.events.send(LifecycleEvent::Started(snapshot.clone()));
        Some(snapshot)
    }

    /// Remove a worker that stopped (gracefully or because its process
    /// exited). Emits `WorkerStopped`. Idempotent.
    pub fn remove_stopped(&self, id: &str) -> Option<WorkerInfo> {
        let snapshot = {
            let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
            let mut info = workers.remove(id)?;
            info.status = WorkerStatus::Stopped;
            info.health = HealthState::Unhealthy;
            info
        };
        let _ = self.events.send(LifecycleEvent::Stopped(snapshot.clone()));
        Some(snapshot)
    }

    /// Remove a worker that failed terminally (spawn timeout, crash loop).
    /// Emits `WorkerFailed`. Idempotent.
    pub fn remove_failed(&self, id: &str) -> Option<WorkerInfo> {
        let snapshot = {
            let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
            let mut info = workers.remove(id)?;
            info.status = WorkerStatus::Failed;
            info.health = HealthState::Unhealthy;
            info
        };
        let _ = self.events.send(LifecycleEvent::Failed(snapshot.clone()));
        Some(snapshot)
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
