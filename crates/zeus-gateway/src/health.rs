//! Periodic liveness and readiness probes.
//!
//! Every interval the monitor snapshots the registry and probes each worker
//! concurrently: OS-level liveness first, then a short-timeout request to
//! the worker's health endpoint. Transitions:
//!
//! - alive + endpoint ok      → `running`/`healthy`
//! - alive + endpoint failing → `degraded`/`unhealthy` (emits `WorkerFailed`
//!   when the worker was previously healthy)
//! - not alive                → reaped: `stopped`/`unhealthy`, entry removed

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::fleet::Fleet;
use zeus_core::{GatewayConfig, WorkerInfo};
use zeus_proto::WorkerHealthReply;

/// The health monitor task.
pub struct HealthMonitor {
    fleet: Arc<Fleet>,
    interval: Duration,
    probe_timeout: Duration,
    http: reqwest::Client,
}

impl HealthMonitor {
    pub fn new(config: &GatewayConfig, fleet: Arc<Fleet>) -> Self {
        Self {
            fleet,
            interval: Duration::from_secs(config.health_interval_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            http: reqwest::Client::new(),
        }
    }

    /// Run probe rounds forever. Spawn this on its own task and abort it
    /// during shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so freshly spawned
        // workers aren't probed twice in a row.
        ticker.tick().await;
        info!(interval_secs = self.interval.as_secs(), "health monitor started");
        loop {
            ticker.tick().await;
            self.probe_round().await;
        }
    }

    /// One probe round over the current fleet. Probes run concurrently and
    /// never block each other.
    pub async fn probe_round(&self) {
        let workers = self.fleet.registry().list(None);
        let probes = workers.into_iter().map(|worker| self.probe(worker));
        futures_util::future::join_all(probes).await;
    }

    async fn probe(&self, worker: WorkerInfo) {
        match self.fleet.is_alive(&worker.id).await {
            // No supervisor for this entry; nothing to probe.
            None => {}
            Some(false) => {
                info!(worker_id = %worker.id, "worker process is gone");
                self.fleet.handle_worker_death(&worker.id).await;
            }
            Some(true) => {
                let healthy =
                    endpoint_healthy(&self.http, worker.port, self.probe_timeout).await;
                let registry = self.fleet.registry();
                if healthy {
                    if !worker.health.is_healthy() {
                        info!(worker_id = %worker.id, "worker recovered");
                        registry.mark_recovered(&worker.id);
                        self.fleet.pools().recompute(registry, &worker.provider);
                    }
                } else if worker.health.is_healthy() || worker.status == zeus_core::WorkerStatus::Running {
                    info!(worker_id = %worker.id, "worker endpoint failing, degrading");
                    registry.mark_degraded(&worker.id);
                    self.fleet.pools().recompute(registry, &worker.provider);
                } else {
                    debug!(worker_id = %worker.id, "worker still degraded");
                }
            }
        }
    }
}

/// Short-timeout probe of a worker's `/health` endpoint on loopback.
pub(crate) async fn endpoint_healthy(
    http: &reqwest::Client,
    port: u16,
    timeout: Duration,
) -> bool {
    let url = format!("http://127.0.0.1:{port}/health");
    match http.get(&url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => {
            match response.json::<WorkerHealthReply>().await {
                Ok(reply) => reply.is_ok(),
                Err(_) => false,
            }
        }
        _ => false,
    }
}
