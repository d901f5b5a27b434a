//! Command router: parses client envelopes and dispatches.
//!
//! Every inbound frame becomes a [`ClientCommand`] and lands in one match.
//! Replies and errors flow back through the client's hub entry, so the
//! per-client write order is whatever order the router produced. Failures
//! never propagate past this boundary: anything an operation returns as
//! `Err` is surfaced to the originating client as an `error` event.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config_store::ConfigStore;
use crate::fanout::Fanout;
use crate::fleet::Fleet;
use crate::hub::ClientHub;
use zeus_core::{Result, ZeusError};
use zeus_proto::{
    ClientCommand, Envelope, GatewayEvent, ProviderSummary, StatusSnapshot,
};

/// Log lines returned when `get_logs` doesn't name a tail.
const DEFAULT_LOG_TAIL: usize = 100;

/// Dispatches parsed client commands.
pub struct Router {
    fleet: Arc<Fleet>,
    hub: Arc<ClientHub>,
    fanout: Arc<Fanout>,
    store: Arc<ConfigStore>,
    started_at: Instant,
}

impl Router {
    pub fn new(
        fleet: Arc<Fleet>,
        hub: Arc<ClientHub>,
        fanout: Arc<Fanout>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            fleet,
            hub,
            fanout,
            store,
            started_at: Instant::now(),
        }
    }

    /// Handle one inbound text frame from a client.
    pub async fn handle_frame(&self, client_id: &str, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reply(client_id, &GatewayEvent::from_error(&e));
                return;
            }
        };
        let command = match ClientCommand::from_envelope(&envelope) {
            Ok(command) => command,
            Err(e) => {
                self.reply(client_id, &GatewayEvent::from_error(&e));
                return;
            }
        };

        debug!(client_id, command = %envelope.kind, "dispatching");
        if let Err(e) = self.dispatch(client_id, command, &envelope).await {
            warn!(client_id, command = %envelope.kind, error = %e, "command failed");
            self.reply(client_id, &GatewayEvent::from_error(&e));
        }
    }

    fn reply(&self, client_id: &str, event: &GatewayEvent) {
        self.hub.send_to(client_id, &event.to_frame());
    }

    async fn dispatch(
        &self,
        client_id: &str,
        command: ClientCommand,
        envelope: &Envelope,
    ) -> Result<()> {
        match command {
            ClientCommand::Ping => {
                self.reply(client_id, &GatewayEvent::pong());
            }

            ClientCommand::Status => {
                let status = self.status_snapshot();
                self.reply(client_id, &GatewayEvent::Status { status });
            }

            ClientCommand::ListProcesses { provider } => {
                let processes = self.fleet.registry().list(provider.as_deref());
                self.reply(client_id, &GatewayEvent::Processes { processes });
            }

            ClientCommand::ListProviders => {
                let providers = self.provider_summaries();
                self.reply(client_id, &GatewayEvent::Providers { providers });
            }

            ClientCommand::ListModels { provider } => {
                let models = self.model_listing(provider.as_deref());
                self.reply(client_id, &GatewayEvent::Models { models });
            }

            ClientCommand::ListSubscriptions => {
                let (processes, providers) = self.fanout.subscriptions_of(client_id);
                self.reply(
                    client_id,
                    &GatewayEvent::Subscriptions {
                        processes,
                        providers,
                    },
                );
            }

            ClientCommand::Spawn {
                provider,
                model,
                port,
            } => {
                // Validates the provider before announcing the spawn.
                self.store.get(&provider)?;
                self.reply(
                    client_id,
                    &GatewayEvent::Spawning {
                        provider: provider.clone(),
                    },
                );
                let worker = self.fleet.spawn(&provider, model, port).await?;
                self.reply(client_id, &GatewayEvent::Spawned { worker });
            }

            ClientCommand::Stop {
                process_id,
                provider,
            } => {
                if let Some(process_id) = process_id {
                    let count = usize::from(self.fleet.stop(&process_id).await?.is_some());
                    self.reply(
                        client_id,
                        &GatewayEvent::Stopped {
                            process_id: Some(process_id),
                            provider: None,
                            count,
                        },
                    );
                } else if let Some(provider) = provider {
                    let count = self.fleet.stop_provider(&provider).await;
                    self.reply(
                        client_id,
                        &GatewayEvent::Stopped {
                            process_id: None,
                            provider: Some(provider),
                            count,
                        },
                    );
                }
            }

            ClientCommand::Scale { provider, count } => {
                self.store.get(&provider)?;
                let (previous, current) = self.fleet.scale(&provider, count).await?;
                self.reply(
                    client_id,
                    &GatewayEvent::Scaled {
                        provider,
                        previous,
                        current,
                    },
                );
            }

            ClientCommand::Chat { provider } => {
                self.handle_chat(client_id, &provider, envelope).await?;
            }

            ClientCommand::Subscribe {
                process_id,
                provider,
            } => {
                if let Some(process_id) = &process_id {
                    if self.fleet.registry().get(process_id).is_none() {
                        return Err(ZeusError::WorkerNotFound {
                            worker_id: process_id.clone(),
                        });
                    }
                    self.fanout.subscribe_worker(client_id, process_id);
                }
                if let Some(provider) = &provider {
                    // Provider tags are an open set; subscribing to one with
                    // no workers yet is fine.
                    self.fanout.subscribe_provider(client_id, provider);
                }
                self.reply(
                    client_id,
                    &GatewayEvent::Subscribed {
                        process_id,
                        provider,
                    },
                );
            }

            ClientCommand::Unsubscribe {
                process_id,
                provider,
                all,
            } => {
                if all {
                    self.fanout.remove_client(client_id);
                } else {
                    if let Some(process_id) = &process_id {
                        self.fanout.unsubscribe_worker(client_id, process_id);
                    }
                    if let Some(provider) = &provider {
                        self.fanout.unsubscribe_provider(client_id, provider);
                    }
                }
                self.reply(
                    client_id,
                    &GatewayEvent::Unsubscribed {
                        process_id,
                        provider,
                        all,
                    },
                );
            }

            ClientCommand::SetModel { process_id, model } => {
                if self.fleet.registry().get(&process_id).is_none() {
                    return Err(ZeusError::WorkerNotFound {
                        worker_id: process_id,
                    });
                }
                self.hub
                    .set_current_worker(client_id, Some(process_id.clone()));
                if let Err(e) = self.fleet.send_to(&process_id, envelope.to_frame()).await {
                    self.hub.clear_if_current(client_id, &process_id);
                    return Err(e);
                }
                self.fleet.registry().record_model(&process_id, &model);
            }

            ClientCommand::GetLogs { process_id, tail } => {
                let logs = self
                    .fleet
                    .logs(&process_id, tail.unwrap_or(DEFAULT_LOG_TAIL))
                    .await?;
                self.reply(client_id, &GatewayEvent::Logs { process_id, logs });
            }

            ClientCommand::Forward {
                kind: _,
                process_id,
                provider,
            } => {
                let worker_id = match (process_id, provider) {
                    (Some(process_id), _) => {
                        if self.fleet.registry().get(&process_id).is_none() {
                            return Err(ZeusError::WorkerNotFound {
                                worker_id: process_id,
                            });
                        }
                        process_id
                    }
                    (None, Some(provider)) => self
                        .fleet
                        .pools()
                        .select(&provider)
                        .ok_or(ZeusError::NoHealthyWorkers { provider })?,
                    (None, None) => {
                        return Err(ZeusError::missing_field("processId or provider"))
                    }
                };
                // The worker's reply travels back via fanout affinity.
                self.hub
                    .set_current_worker(client_id, Some(worker_id.clone()));
                if let Err(e) = self.fleet.send_to(&worker_id, envelope.to_frame()).await {
                    self.hub.clear_if_current(client_id, &worker_id);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// The `chat` algorithm: select a healthy worker, auto-spawning one when
    /// the pool is empty and policy allows, record affinity, forward.
    async fn handle_chat(
        &self,
        client_id: &str,
        provider: &str,
        envelope: &Envelope,
    ) -> Result<()> {
        let worker_id = match self.fleet.pools().select(provider) {
            Some(worker_id) => worker_id,
            None => {
                let auto_spawn = self
                    .store
                    .get(provider)
                    .map(|c| c.auto_spawn)
                    .unwrap_or(false);
                if !auto_spawn {
                    return Err(ZeusError::NoHealthyWorkers {
                        provider: provider.to_string(),
                    });
                }
                match self.fleet.spawn(provider, None, None).await {
                    Ok(worker) => worker.id,
                    Err(e) => {
                        self.reply(
                            client_id,
                            &GatewayEvent::Error {
                                message: e.to_string(),
                                hint: Some(serde_json::json!({
                                    "type": "spawn",
                                    "provider": provider,
                                })),
                            },
                        );
                        return Ok(());
                    }
                }
            }
        };

        self.hub
            .set_current_worker(client_id, Some(worker_id.clone()));
        if let Err(e) = self.fleet.send_to(&worker_id, envelope.to_frame()).await {
            self.hub.clear_if_current(client_id, &worker_id);
            return Err(e);
        }
        Ok(())
    }

    /// Gateway + fleet snapshot (also used by the HTTP status endpoint).
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            clients: self.hub.len(),
            workers: self.fleet.registry().list(None),
            providers: self.provider_summaries(),
        }
    }

    /// Per-provider summaries (also used by the HTTP providers endpoint).
    pub fn provider_summaries(&self) -> Vec<ProviderSummary> {
        self.store
            .providers()
            .into_iter()
            .filter_map(|provider| {
                let config = self.store.get(&provider).ok()?;
                Some(ProviderSummary {
                    workers: self.fleet.registry().list(Some(&provider)).len(),
                    healthy: self.fleet.registry().healthy(&provider).len(),
                    default_model: config.default_model,
                    auto_spawn: config.auto_spawn,
                    provider,
                })
            })
            .collect()
    }

    fn model_listing(&self, provider: Option<&str>) -> BTreeMap<String, Vec<String>> {
        let mut models: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for worker in self.fleet.registry().list(provider) {
            let entry = models.entry(worker.provider.clone()).or_default();
            for model in worker.available_models {
                if !entry.contains(&model) {
                    entry.push(model);
                }
            }
            if let Some(model) = worker.model {
                if !entry.contains(&model) {
                    entry.push(model);
                }
            }
        }
        // Providers with no live workers still advertise their default model.
        for provider in self
            .store
            .providers()
            .into_iter()
            .filter(|p| provider.map_or(true, |f| f == p))
        {
            let entry = models.entry(provider.clone()).or_default();
            if entry.is_empty() {
                if let Some(default_model) =
                    self.store.get(&provider).ok().and_then(|c| c.default_model)
                {
                    entry.push(default_model);
                }
            }
        }
        models
    }
}

// Dispatch behavior is covered end-to-end in `tests/gateway_integration.rs`;
// envelope/command parsing has its own unit tests in `zeus-proto`.
