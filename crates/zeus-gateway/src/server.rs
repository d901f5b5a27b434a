//! The gateway facade: wiring plus the client-facing surfaces.
//!
//! Owns the WebSocket accept loop for the bidirectional client stream, the
//! auxiliary request/response HTTP endpoints, and a small path-traversal-safe
//! file server for worker-produced artifacts. Start sequence: clean up stale
//! artifacts, start the health monitor, open listeners, accept. Stop
//! sequence: stop accepting, notify clients, stop the monitor, stop all
//! workers in parallel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config_store::{ConfigStore, ProviderConfigPatch};
use crate::fanout::Fanout;
use crate::fleet::Fleet;
use crate::health::HealthMonitor;
use crate::hub::ClientHub;
use crate::launch::{ContainerBackend, SubprocessBackend, WorkerBackend};
use crate::pool::ProviderPools;
use crate::registry::WorkerRegistry;
use crate::router::Router;
use zeus_core::{BackendKind, GatewayConfig, LifecycleEvent, Result, ZeusError};
use zeus_proto::GatewayEvent;

/// The assembled gateway.
pub struct Gateway {
    config: GatewayConfig,
    hub: Arc<ClientHub>,
    fanout: Arc<Fanout>,
    fleet: Arc<Fleet>,
    store: Arc<ConfigStore>,
    router: Router,
    session_id: String,
    health_task: StdMutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl Gateway {
    /// Wire the gateway with the backend named in the config.
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>> {
        let backend: Arc<dyn WorkerBackend> = match config.backend {
            BackendKind::Container => Arc::new(ContainerBackend::new(config.stop_grace_secs)),
            BackendKind::Subprocess => Arc::new(SubprocessBackend),
        };
        Self::with_backend(config, backend)
    }

    /// Wire the gateway with an explicit backend (tests inject stubs here).
    pub fn with_backend(
        config: GatewayConfig,
        backend: Arc<dyn WorkerBackend>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = Arc::new(WorkerRegistry::new());
        let pools = Arc::new(ProviderPools::new());
        let store = Arc::new(ConfigStore::from_config(&config));
        let hub = Arc::new(ClientHub::new());
        let fanout = Arc::new(Fanout::new(Arc::clone(&hub)));

        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let (deaths_tx, mut deaths_rx) = tokio::sync::mpsc::unbounded_channel();

        let fleet = Arc::new(Fleet::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&pools),
            Arc::clone(&store),
            backend,
            events_tx,
            deaths_tx,
        ));
        let router = Router::new(
            Arc::clone(&fleet),
            Arc::clone(&hub),
            Arc::clone(&fanout),
            Arc::clone(&store),
        );

        // Fanout pump: worker events, in per-worker order, to delivery sets.
        {
            let fanout = Arc::clone(&fanout);
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    fanout.deliver(&event);
                }
            });
        }

        // Death pump: reap workers whose stream closed underneath us.
        {
            let fleet = Arc::clone(&fleet);
            tokio::spawn(async move {
                while let Some(worker_id) = deaths_rx.recv().await {
                    fleet.handle_worker_death(&worker_id).await;
                }
            });
        }

        // Lifecycle reactions in one place: a removed worker loses its
        // subscriptions and any affinity pointing at it, and its provider's
        // pool is recomputed.
        {
            let mut lifecycle_rx = registry.subscribe();
            let hub = Arc::clone(&hub);
            let fanout = Arc::clone(&fanout);
            let registry = Arc::clone(&registry);
            let pools = Arc::clone(&pools);
            tokio::spawn(async move {
                while let Ok(event) = lifecycle_rx.recv().await {
                    let worker = event.worker();
                    pools.recompute(&registry, &worker.provider);
                    match &event {
                        LifecycleEvent::Stopped(w) => {
                            hub.clear_affinity_to(&w.id);
                            fanout.remove_worker(&w.id);
                        }
                        LifecycleEvent::Failed(w) if w.status.is_terminal() => {
                            hub.clear_affinity_to(&w.id);
                            fanout.remove_worker(&w.id);
                        }
                        _ => {}
                    }
                }
            });
        }

        Ok(Arc::new(Self {
            config,
            hub,
            fanout,
            fleet,
            store,
            router,
            session_id: uuid::Uuid::new_v4().to_string(),
            health_task: StdMutex::new(None),
            stopping: AtomicBool::new(false),
        }))
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// Start sequence: workspace dirs, stale-artifact cleanup, health monitor.
    pub async fn startup(self: &Arc<Self>) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.workspace)
            .await
            .map_err(|e| ZeusError::DirectoryCreation {
                path: self.config.workspace.clone(),
                source: e,
            })?;
        tokio::fs::create_dir_all(&self.config.prompts_dir)
            .await
            .map_err(|e| ZeusError::DirectoryCreation {
                path: self.config.prompts_dir.clone(),
                source: e,
            })?;

        self.fleet.cleanup_stale().await?;

        let monitor = HealthMonitor::new(&self.config, Arc::clone(&self.fleet));
        let handle = tokio::spawn(monitor.run());
        let mut task = self.health_task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(handle);
        Ok(())
    }

    /// The axum application: WebSocket stream plus the auxiliary HTTP
    /// surface, permissive CORS on all of it.
    pub fn app(self: &Arc<Self>) -> axum::Router {
        axum::Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(http_health))
            .route("/status", get(http_status))
            .route("/providers", get(http_providers))
            .route("/processes", get(http_processes))
            .route("/logs/:worker_id", get(http_logs))
            .route("/config/:provider", get(http_config_get).post(http_config_post))
            .route("/serve/*path", get(http_serve))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(self))
    }

    /// Bind, serve until a shutdown signal, then run the stop sequence.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.startup().await?;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            ZeusError::internal(format!("failed to bind {addr}: {e}"))
        })?;
        info!(addr = %addr, "gateway listening");

        let app = self.app();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ZeusError::internal(format!("server error: {e}")))?;

        self.shutdown().await;
        Ok(())
    }

    /// Idempotent graceful stop: notify clients, stop the health monitor,
    /// stop all workers in parallel.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("gateway shutting down");

        self.hub.broadcast(
            &GatewayEvent::Shutdown {
                reason: "gateway stopping".to_string(),
            }
            .to_frame(),
        );

        let handle = {
            let mut task = self.health_task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        let stopped = self.fleet.stop_all().await;
        info!(stopped, "all workers stopped");
    }
}

/// SIGINT / SIGTERM, whichever lands first.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// =============================================================================
// WebSocket surface
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, gateway))
}

/// One client connection: attach, greet, then a select loop pairing the
/// inbound socket with the client's outbound queue. The socket task is the
/// single writer for this client, so delivery order is preserved.
async fn handle_client(mut socket: WebSocket, gateway: Arc<Gateway>) {
    let (client_id, mut outbound_rx) = gateway.hub.attach();

    let connected = GatewayEvent::Connected {
        session_id: gateway.session_id.clone(),
        client_id: client_id.clone(),
        providers: gateway.store.providers(),
    };
    if socket
        .send(Message::Text(connected.to_frame()))
        .await
        .is_err()
    {
        gateway.fanout.remove_client(&client_id);
        gateway.hub.detach(&client_id);
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        gateway.router.handle_frame(&client_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "client socket error");
                        break;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Teardown: subscriptions first, then the hub entry (and with it any
    // affinity this client held).
    gateway.fanout.remove_client(&client_id);
    gateway.hub.detach(&client_id);
    info!(client_id = %client_id, "client disconnected");
}

// =============================================================================
// Auxiliary HTTP surface
// =============================================================================

#[derive(Deserialize)]
struct ProviderQuery {
    provider: Option<String>,
}

#[derive(Deserialize)]
struct TailQuery {
    tail: Option<usize>,
}

#[derive(Deserialize)]
struct ConfigPostBody {
    #[serde(flatten)]
    patch: ProviderConfigPatch,
    #[serde(default)]
    restart: bool,
}

fn error_status(err: &ZeusError) -> StatusCode {
    match err {
        ZeusError::WorkerNotFound { .. } | ZeusError::UnknownProvider { .. } => {
            StatusCode::NOT_FOUND
        }
        e if e.is_input_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_json(err: &ZeusError) -> (StatusCode, Json<Value>) {
    (error_status(err), Json(json!({ "error": err.to_string() })))
}

async fn http_health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "zeus-gateway",
        "workers": gateway.fleet.registry().len(),
        "clients": gateway.hub.len(),
    }))
}

async fn http_status(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(json!({ "status": gateway.router.status_snapshot() }))
}

async fn http_providers(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(json!({ "providers": gateway.router.provider_summaries() }))
}

async fn http_processes(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<ProviderQuery>,
) -> impl IntoResponse {
    let processes = gateway.fleet.registry().list(query.provider.as_deref());
    Json(json!({ "processes": processes }))
}

async fn http_logs(
    State(gateway): State<Arc<Gateway>>,
    Path(worker_id): Path<String>,
    Query(query): Query<TailQuery>,
) -> impl IntoResponse {
    match gateway
        .fleet
        .logs(&worker_id, query.tail.unwrap_or(100))
        .await
    {
        Ok(logs) => (
            StatusCode::OK,
            Json(json!({ "processId": worker_id, "logs": logs })),
        ),
        Err(e) => error_json(&e),
    }
}

async fn http_config_get(
    State(gateway): State<Arc<Gateway>>,
    Path(provider): Path<String>,
) -> impl IntoResponse {
    match gateway.store.get(&provider) {
        Ok(config) => (StatusCode::OK, Json(json!({ "config": config }))),
        Err(e) => error_json(&e),
    }
}

async fn http_config_post(
    State(gateway): State<Arc<Gateway>>,
    Path(provider): Path<String>,
    Json(body): Json<ConfigPostBody>,
) -> impl IntoResponse {
    let update = match gateway
        .store
        .update(gateway.fleet.registry(), &provider, body.patch)
        .await
    {
        Ok(update) => update,
        Err(e) => return error_json(&e),
    };

    let mut restarted = Vec::new();
    if body.restart && !update.affected.is_empty() {
        match gateway
            .fleet
            .restart_workers(&provider, &update.affected)
            .await
        {
            Ok(_) => restarted = update.affected.clone(),
            Err(e) => {
                warn!(provider = %provider, error = %e, "config restart failed");
                return error_json(&e);
            }
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "provider": provider,
            "config": update.config,
            "restartedContainers": restarted,
        })),
    )
}

/// Path-traversal-safe static read from the workspace root. The resolved
/// path must keep the workspace root as a prefix; symlink escapes resolve
/// outside the root and are rejected the same way.
async fn http_serve(
    State(gateway): State<Arc<Gateway>>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    // Reject upward components outright; a missing `../…` target must not
    // downgrade the traversal attempt to a plain 404.
    if std::path::Path::new(&path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return (StatusCode::FORBIDDEN, "forbidden".to_string()).into_response();
    }

    let root = match tokio::fs::canonicalize(&gateway.config.workspace).await {
        Ok(root) => root,
        Err(_) => {
            return (StatusCode::NOT_FOUND, "workspace not found".to_string()).into_response()
        }
    };

    let candidate = root.join(path.trim_start_matches('/'));
    let resolved = match tokio::fs::canonicalize(&candidate).await {
        Ok(resolved) => resolved,
        Err(_) => return (StatusCode::NOT_FOUND, "not found".to_string()).into_response(),
    };

    if !resolved.starts_with(&root) {
        return (StatusCode::FORBIDDEN, "forbidden".to_string()).into_response();
    }

    match tokio::fs::read(&resolved).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found".to_string()).into_response(),
    }
}
