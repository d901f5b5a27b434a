//! The fleet: owner of the worker lifecycle.
//!
//! One map of supervisors keyed by worker id, plus the port allocator, the
//! launch backend, the registry and the pools. Every spawn/stop path runs
//! through here so the resource pairing holds: a port is allocated iff a
//! registry entry references it, and every launched worker is reaped on
//! every exit path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, instrument, warn};

use crate::config_store::ConfigStore;
use crate::fanout::WorkerEvent;
use crate::launch::{LaunchSpec, WorkerBackend};
use crate::pool::ProviderPools;
use crate::ports::PortAllocator;
use crate::registry::WorkerRegistry;
use crate::supervisor::WorkerSupervisor;
use zeus_core::{worker_id_for, GatewayConfig, Result, WorkerId, WorkerInfo, ZeusError};

/// Owner of all live workers.
pub struct Fleet {
    config: GatewayConfig,
    allocator: PortAllocator,
    registry: Arc<WorkerRegistry>,
    pools: Arc<ProviderPools>,
    store: Arc<ConfigStore>,
    backend: Arc<dyn WorkerBackend>,
    supervisors: RwLock<HashMap<WorkerId, Arc<WorkerSupervisor>>>,
    http: reqwest::Client,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    deaths_tx: mpsc::UnboundedSender<WorkerId>,
}

impl Fleet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GatewayConfig,
        registry: Arc<WorkerRegistry>,
        pools: Arc<ProviderPools>,
        store: Arc<ConfigStore>,
        backend: Arc<dyn WorkerBackend>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        deaths_tx: mpsc::UnboundedSender<WorkerId>,
    ) -> Self {
        let allocator = PortAllocator::new(config.port_range_low, config.port_range_high);
        Self {
            config,
            allocator,
            registry,
            pools,
            store,
            backend,
            supervisors: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            events_tx,
            deaths_tx,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn pools(&self) -> &Arc<ProviderPools> {
        &self.pools
    }

    /// Remove stale OS artifacts from a previous gateway run.
    pub async fn cleanup_stale(&self) -> Result<usize> {
        let removed = self.backend.cleanup_stale().await?;
        if removed > 0 {
            info!(removed, "cleaned up stale worker artifacts");
        }
        Ok(removed)
    }

    /// Spawn one worker: materialize config, acquire a port, launch, wait
    /// for readiness, connect the stream. Every failure path releases the
    /// port and deregisters.
    #[instrument(level = "info", skip(self), fields(provider = %provider))]
    pub async fn spawn(
        &self,
        provider: &str,
        model: Option<String>,
        port: Option<u16>,
    ) -> Result<WorkerInfo> {
        let provider_config = self.store.materialize(provider).await?;

        let port = match port {
            Some(port) => {
                self.allocator.claim(port, provider)?;
                port
            }
            None => self.allocator.allocate(provider)?,
        };
        let worker_id = worker_id_for(provider, port);

        let model = model.or_else(|| provider_config.default_model.clone());
        let spec = LaunchSpec {
            worker_id: worker_id.clone(),
            provider: provider.to_string(),
            host_port: port,
            inner_port: provider_config.default_inner_port,
            model: model.clone(),
            image: provider_config.image.clone(),
            command: provider_config.command.clone(),
            workspace: self.config.workspace.clone(),
            prompts_dir: self.config.prompts_dir.clone(),
            env_keys: provider_config.env_keys.clone(),
            debug: self.config.debug,
        };

        let process = match self.backend.launch(&spec).await {
            Ok(process) => process,
            Err(e) => {
                self.allocator.release(port);
                return Err(e);
            }
        };

        let mut info = WorkerInfo::new(provider, port);
        info.model = model;
        self.registry.insert(info);

        let supervisor = Arc::new(WorkerSupervisor::new(
            worker_id.clone(),
            provider.to_string(),
            port,
            process,
            Duration::from_secs(self.config.stop_grace_secs),
        ));
        {
            let mut supervisors = self.supervisors.write().await;
            supervisors.insert(worker_id.clone(), Arc::clone(&supervisor));
        }

        let ready = supervisor
            .wait_ready(
                &self.http,
                Duration::from_secs(self.config.probe_timeout_secs),
                Duration::from_secs(self.config.ready_deadline_secs),
            )
            .await;

        let status = match ready {
            Ok(status) => status,
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "worker failed to become ready");
                supervisor.stop().await;
                {
                    let mut supervisors = self.supervisors.write().await;
                    supervisors.remove(&worker_id);
                }
                self.registry.remove_failed(&worker_id);
                self.allocator.release(port);
                return Err(e);
            }
        };

        self.registry.mark_ready(&worker_id, status.model);
        self.pools.recompute(&self.registry, provider);

        // Registry insertion is complete before the read loop begins, so a
        // `spawned` reply always precedes the new worker's first event.
        if let Err(e) = supervisor
            .connect(
                Arc::clone(&self.registry),
                self.events_tx.clone(),
                self.deaths_tx.clone(),
            )
            .await
        {
            warn!(worker_id = %worker_id, error = %e, "worker stream connect failed");
            self.registry.mark_degraded(&worker_id);
            self.pools.recompute(&self.registry, provider);
        }

        self.registry
            .get(&worker_id)
            .ok_or_else(|| ZeusError::internal("worker vanished during spawn"))
    }

    /// Stop one worker. Idempotent: an unknown or already-stopped id
    /// returns `Ok(None)` and changes nothing.
    #[instrument(level = "info", skip(self))]
    pub async fn stop(&self, worker_id: &str) -> Result<Option<WorkerInfo>> {
        let supervisor = {
            let mut supervisors = self.supervisors.write().await;
            supervisors.remove(worker_id)
        };
        let Some(supervisor) = supervisor else {
            return Ok(None);
        };

        supervisor.stop().await;
        let info = self.registry.remove_stopped(worker_id);
        self.allocator.release(supervisor.port);
        self.pools.recompute(&self.registry, &supervisor.provider);
        Ok(info)
    }

    /// Stop every worker of a provider, in parallel. Returns the count.
    pub async fn stop_provider(&self, provider: &str) -> usize {
        let ids: Vec<WorkerId> = {
            let supervisors = self.supervisors.read().await;
            supervisors
                .values()
                .filter(|s| s.provider == provider)
                .map(|s| s.worker_id.clone())
                .collect()
        };
        self.stop_many(ids).await
    }

    /// Stop the whole fleet, in parallel. Used during gateway shutdown.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<WorkerId> = {
            let supervisors = self.supervisors.read().await;
            supervisors.keys().cloned().collect()
        };
        self.stop_many(ids).await
    }

    async fn stop_many(&self, ids: Vec<WorkerId>) -> usize {
        let stops = ids.iter().map(|id| self.stop(id));
        futures_util::future::join_all(stops)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count()
    }

    /// Spawn or stop workers to reach `count` for a provider.
    /// Returns `(previous, current)`.
    pub async fn scale(&self, provider: &str, count: usize) -> Result<(usize, usize)> {
        let existing = self.registry.list(Some(provider));
        let previous = existing.len();

        if count > previous {
            for _ in previous..count {
                self.spawn(provider, None, None).await?;
            }
        } else if count < previous {
            // Stop the newest first.
            let mut by_age = existing;
            by_age.sort_by_key(|w| w.created_at);
            for worker in by_age.iter().rev().take(previous - count) {
                self.stop(&worker.id).await?;
            }
        }

        let current = self.registry.list(Some(provider)).len();
        Ok((previous, current))
    }

    /// Forward a framed envelope to one worker's outbound stream.
    pub async fn send_to(&self, worker_id: &str, frame: String) -> Result<()> {
        let supervisor = {
            let supervisors = self.supervisors.read().await;
            supervisors.get(worker_id).cloned()
        };
        match supervisor {
            Some(supervisor) => supervisor.send(frame),
            None => Err(ZeusError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            }),
        }
    }

    /// Tail of one worker's log stream.
    pub async fn logs(&self, worker_id: &str, tail: usize) -> Result<Vec<String>> {
        let supervisor = {
            let supervisors = self.supervisors.read().await;
            supervisors.get(worker_id).cloned()
        };
        match supervisor {
            Some(supervisor) => supervisor.logs(tail).await,
            None => Err(ZeusError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            }),
        }
    }

    /// OS-level liveness of one worker, for the health monitor.
    pub async fn is_alive(&self, worker_id: &str) -> Option<bool> {
        let supervisor = {
            let supervisors = self.supervisors.read().await;
            supervisors.get(worker_id).cloned()
        };
        match supervisor {
            Some(supervisor) => Some(supervisor.is_alive().await),
            None => None,
        }
    }

    /// Reap a worker whose process or stream died underneath us.
    /// No-op when a regular stop already owns the cleanup.
    pub async fn handle_worker_death(&self, worker_id: &str) {
        let supervisor = {
            let mut supervisors = self.supervisors.write().await;
            match supervisors.get(worker_id) {
                Some(s) if s.is_stopping() => return,
                Some(_) => supervisors.remove(worker_id),
                None => return,
            }
        };
        let Some(supervisor) = supervisor else { return };

        info!(worker_id, "reaping dead worker");
        supervisor.stop().await;
        self.registry.remove_stopped(worker_id);
        self.allocator.release(supervisor.port);
        self.pools.recompute(&self.registry, &supervisor.provider);
    }

    /// Restart the named workers of a provider (used after a config change).
    /// Returns the replacement worker records.
    pub async fn restart_workers(
        &self,
        provider: &str,
        worker_ids: &[WorkerId],
    ) -> Result<Vec<WorkerInfo>> {
        let mut stopped = 0;
        for worker_id in worker_ids {
            if self.stop(worker_id).await?.is_some() {
                stopped += 1;
            }
        }
        let mut replacements = Vec::with_capacity(stopped);
        for _ in 0..stopped {
            replacements.push(self.spawn(provider, None, None).await?);
        }
        Ok(replacements)
    }

    /// Number of ports currently allocated (test hook).
    pub fn ports_in_use(&self) -> usize {
        self.allocator.in_use()
    }
}
