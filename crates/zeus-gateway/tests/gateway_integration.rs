//! End-to-end gateway tests against stub workers.
//!
//! A `StubBackend` stands in for the container runtime: each "launch" starts
//! an in-process axum server speaking the worker contract (health/status
//! endpoints, a ws stream greeting with `connected`, scripted replies to
//! `chat` and the orchestration-forward commands). The gateway is exercised
//! through its real surfaces: the client WebSocket and the auxiliary HTTP
//! endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as AxMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use zeus_core::{BackendKind, GatewayConfig, ProviderDefaults, Result};
use zeus_gateway::launch::{LaunchSpec, WorkerBackend, WorkerProcess};
use zeus_gateway::Gateway;

// =============================================================================
// Stub worker
// =============================================================================

struct StubState {
    name: String,
    received: Arc<StdMutex<Vec<Value>>>,
}

async fn stub_health() -> impl IntoResponse {
    Json(json!({"status": "ok", "ready": true, "authenticated": true, "uptime": 1.0}))
}

async fn stub_status() -> impl IntoResponse {
    Json(json!({
        "model": "stub-model",
        "availableModels": ["stub-model", "stub-pro"],
        "sessionId": "stub-session",
    }))
}

async fn stub_ws(ws: WebSocketUpgrade, State(state): State<Arc<StubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stub_stream(socket, state))
}

async fn stub_stream(mut socket: WebSocket, state: Arc<StubState>) {
    let hello = json!({
        "type": "connected",
        "payload": {
            "name": state.name,
            "sessionId": "stub-session",
            "model": "stub-model",
            "availableModels": ["stub-model", "stub-pro"],
            "ready": true,
            "authenticated": true,
        }
    });
    if socket.send(AxMessage::Text(hello.to_string())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            AxMessage::Text(text) => text,
            AxMessage::Close(_) => break,
            _ => continue,
        };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        state.received.lock().unwrap().push(frame.clone());

        let replies = match frame["type"].as_str() {
            Some("chat") => vec![
                json!({"type": "thinking", "payload": {}}),
                json!({"type": "content_delta", "payload": {"text": "hello"}}),
                json!({"type": "done", "payload": {}}),
            ],
            Some("set_system_prompt") => vec![json!({
                "type": "system_prompt_changed",
                "payload": {"prompt": frame["payload"]["prompt"]},
            })],
            Some("set_model") => vec![json!({
                "type": "model_changed",
                "payload": {"model": frame["payload"]["model"]},
            })],
            _ => vec![],
        };
        for reply in replies {
            if socket
                .send(AxMessage::Text(reply.to_string()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

// =============================================================================
// Stub backend
// =============================================================================

struct StubWorkerHandle {
    alive: Arc<AtomicBool>,
    received: Arc<StdMutex<Vec<Value>>>,
    server: JoinHandle<()>,
}

#[derive(Default)]
struct StubBackend {
    workers: StdMutex<HashMap<String, Arc<StubWorkerHandle>>>,
}

impl StubBackend {
    fn handle(&self, worker_id: &str) -> Option<Arc<StubWorkerHandle>> {
        self.workers.lock().unwrap().get(worker_id).cloned()
    }

    fn received_by(&self, worker_id: &str) -> Vec<Value> {
        self.handle(worker_id)
            .map(|h| h.received.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

struct StubProcess {
    handle: Arc<StubWorkerHandle>,
}

#[async_trait]
impl WorkerBackend for StubBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
        let state = Arc::new(StubState {
            name: spec.worker_id.clone(),
            received: Arc::new(StdMutex::new(Vec::new())),
        });
        let app = axum::Router::new()
            .route("/health", get(stub_health))
            .route("/status", get(stub_status))
            .route("/ws", get(stub_ws))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind(("127.0.0.1", spec.host_port))
            .await
            .expect("stub worker bind");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let handle = Arc::new(StubWorkerHandle {
            alive: Arc::new(AtomicBool::new(true)),
            received: state.received.clone(),
            server,
        });
        self.workers
            .lock()
            .unwrap()
            .insert(spec.worker_id.clone(), Arc::clone(&handle));
        Ok(Box::new(StubProcess { handle }))
    }

    async fn cleanup_stale(&self) -> Result<usize> {
        Ok(0)
    }
}

#[async_trait]
impl WorkerProcess for StubProcess {
    async fn is_alive(&self) -> bool {
        self.handle.alive.load(Ordering::SeqCst)
    }
    async fn terminate(&self) -> Result<()> {
        self.handle.alive.store(false, Ordering::SeqCst);
        self.handle.server.abort();
        Ok(())
    }
    async fn kill(&self) -> Result<()> {
        self.terminate().await
    }
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
    async fn logs(&self, _tail: usize) -> Result<Vec<String>> {
        Ok(vec!["stub log line".to_string()])
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Each gateway gets its own slice of the port space so parallel tests
/// never collide.
static NEXT_RANGE: AtomicU16 = AtomicU16::new(42_000);

struct TestGateway {
    gateway: Arc<Gateway>,
    addr: SocketAddr,
    backend: Arc<StubBackend>,
    workspace: TempDir,
}

async fn start_gateway(auto_spawn: bool) -> TestGateway {
    let workspace = TempDir::new().unwrap();
    let low = NEXT_RANGE.fetch_add(20, Ordering::SeqCst);

    let mut providers = HashMap::new();
    providers.insert(
        "gemini".to_string(),
        ProviderDefaults {
            default_model: Some("stub-model".to_string()),
            default_inner_port: 9000,
            env_keys: vec![],
            system_prompt: String::new(),
            auto_spawn,
            image: Some("stub:latest".to_string()),
            command: None,
        },
    );

    let config = GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        port_range_low: low,
        port_range_high: low + 20,
        workspace: workspace.path().join("ws"),
        prompts_dir: workspace.path().join("prompts"),
        backend: BackendKind::Container,
        health_interval_secs: 3600,
        probe_timeout_secs: 2,
        ready_deadline_secs: 10,
        stop_grace_secs: 2,
        debug: false,
        providers,
    };

    let backend = Arc::new(StubBackend::default());
    let gateway =
        Gateway::with_backend(config, Arc::clone(&backend) as Arc<dyn WorkerBackend>).unwrap();
    gateway.startup().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = gateway.app();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestGateway {
        gateway,
        addr,
        backend,
        workspace,
    }
}

struct TestClient {
    write: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        WsMessage,
    >,
    read: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
    client_id: String,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("client connect");
        let (write, read) = stream.split();
        let mut client = Self {
            write,
            read,
            client_id: String::new(),
        };
        let connected = client.recv().await;
        assert_eq!(connected["type"], "connected");
        assert!(connected["sessionId"].as_str().is_some());
        client.client_id = connected["clientId"].as_str().unwrap().to_string();
        assert!(!client.client_id.is_empty());
        client
    }

    async fn send(&mut self, frame: Value) {
        self.write
            .send(WsMessage::Text(frame.to_string()))
            .await
            .expect("client send");
    }

    async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(10), self.read.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("stream error");
            match message {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsMessage::Close(_) => panic!("unexpected close"),
                _ => continue,
            }
        }
    }

    /// Read frames until one of the given type arrives; returns it along
    /// with everything skipped on the way.
    async fn recv_until(&mut self, kind: &str) -> (Value, Vec<Value>) {
        let mut skipped = Vec::new();
        loop {
            let frame = self.recv().await;
            if frame["type"] == kind {
                return (frame, skipped);
            }
            skipped.push(frame);
        }
    }
}

async fn spawn_worker(client: &mut TestClient, provider: &str) -> Value {
    client
        .send(json!({"type": "spawn", "payload": {"provider": provider}}))
        .await;
    let spawning = client.recv().await;
    assert_eq!(spawning["type"], "spawning");
    let spawned = client.recv().await;
    assert_eq!(spawned["type"], "spawned", "unexpected reply: {spawned}");
    spawned["worker"].clone()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn unknown_command_is_reported() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    client.send(json!({"type": "invalid_xyz"})).await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("Unknown"));
}

#[tokio::test]
async fn chat_without_workers_and_no_auto_spawn_fails() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    client
        .send(json!({"type": "chat", "payload": {"provider": "gemini", "text": "hi"}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("No healthy"));
}

#[tokio::test]
async fn ping_returns_pong_with_timestamp() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    client.send(json!({"type": "ping"})).await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "pong");
    assert!(reply["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn spawn_then_introspect_then_stop_all() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let w1 = spawn_worker(&mut client, "gemini").await;
    let w2 = spawn_worker(&mut client, "gemini").await;
    assert_ne!(w1["id"], w2["id"]);
    assert_ne!(w1["port"], w2["port"]);

    client
        .send(json!({"type": "list_processes", "payload": {"provider": "gemini"}}))
        .await;
    let listing = client.recv().await;
    assert_eq!(listing["type"], "processes");
    assert_eq!(listing["processes"].as_array().unwrap().len(), 2);

    client
        .send(json!({"type": "stop", "payload": {"provider": "gemini"}}))
        .await;
    let stopped = client.recv().await;
    assert_eq!(stopped["type"], "stopped");
    assert_eq!(stopped["provider"], "gemini");
    assert_eq!(stopped["count"], 2);

    client
        .send(json!({"type": "list_processes", "payload": {"provider": "gemini"}}))
        .await;
    let listing = client.recv().await;
    assert_eq!(listing["processes"].as_array().unwrap().len(), 0);

    // Ports are reclaimed on every stop path.
    assert_eq!(harness.gateway.fleet().ports_in_use(), 0);
}

#[tokio::test]
async fn stop_unknown_worker_is_idempotent() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    client
        .send(json!({"type": "stop", "payload": {"processId": "zeus-gemini-9999"}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "stopped");
    assert_eq!(reply["count"], 0);
}

#[tokio::test]
async fn scale_up_then_down() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    client
        .send(json!({"type": "scale", "payload": {"provider": "gemini", "count": 2}}))
        .await;
    let scaled = client.recv().await;
    assert_eq!(scaled["type"], "scaled");
    assert_eq!(scaled["previous"], 0);
    assert_eq!(scaled["current"], 2);

    client
        .send(json!({"type": "scale", "payload": {"provider": "gemini", "count": 1}}))
        .await;
    let scaled = client.recv().await;
    assert_eq!(scaled["previous"], 2);
    assert_eq!(scaled["current"], 1);

    client
        .send(json!({"type": "list_processes", "payload": {"provider": "gemini"}}))
        .await;
    let listing = client.recv().await;
    assert_eq!(listing["processes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn subscription_fanout_wraps_and_deduplicates() {
    let harness = start_gateway(true).await;
    let mut subscriber = TestClient::connect(harness.addr).await;
    let mut chatter = TestClient::connect(harness.addr).await;

    subscriber
        .send(json!({"type": "subscribe", "payload": {"provider": "gemini"}}))
        .await;
    let reply = subscriber.recv().await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["provider"], "gemini");

    // Chat auto-spawns the worker, records affinity, forwards.
    chatter
        .send(json!({"type": "chat", "payload": {"provider": "gemini", "text": "hi"}}))
        .await;

    // The chatter gets the worker's events unwrapped, in order, ending in
    // `done`. (A `connected` hello may race in ahead of affinity.)
    let (_, skipped) = chatter.recv_until("thinking").await;
    for frame in &skipped {
        assert_eq!(frame["type"], "connected");
    }
    let delta = chatter.recv().await;
    assert_eq!(delta["type"], "content_delta");
    assert_eq!(delta["payload"]["text"], "hello");
    let done = chatter.recv().await;
    assert_eq!(done["type"], "done");

    // The subscriber sees the same events wrapped, each exactly once.
    let mut seen = Vec::new();
    loop {
        let frame = subscriber.recv().await;
        assert_eq!(frame["type"], "stream");
        assert_eq!(frame["source"], "provider");
        assert_eq!(frame["provider"], "gemini");
        let event = frame["event"].as_str().unwrap().to_string();
        assert!(
            !seen.contains(&event),
            "subscriber received {event} twice: {seen:?}"
        );
        seen.push(event.clone());
        if event == "done" {
            break;
        }
    }
    assert!(seen.contains(&"thinking".to_string()));
    assert!(seen.contains(&"content_delta".to_string()));
}

#[tokio::test]
async fn orchestration_forward_round_trips() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let worker = spawn_worker(&mut client, "gemini").await;
    let worker_id = worker["id"].as_str().unwrap().to_string();

    client
        .send(json!({
            "type": "set_system_prompt",
            "payload": {"processId": worker_id, "prompt": "Y"},
        }))
        .await;

    // The worker's reply reaches the originating client unwrapped.
    let (changed, _) = client.recv_until("system_prompt_changed").await;
    assert_eq!(changed["payload"]["prompt"], "Y");

    // The gateway forwarded a matching frame verbatim.
    let received = harness.backend.received_by(&worker_id);
    let forwarded = received
        .iter()
        .find(|f| f["type"] == "set_system_prompt")
        .expect("worker never saw the forward");
    assert_eq!(forwarded["payload"]["prompt"], "Y");
    assert_eq!(forwarded["payload"]["processId"], worker_id);
}

#[tokio::test]
async fn set_model_marks_affinity_and_forwards() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let worker = spawn_worker(&mut client, "gemini").await;
    let worker_id = worker["id"].as_str().unwrap().to_string();

    client
        .send(json!({
            "type": "set_model",
            "payload": {"processId": worker_id, "model": "stub-pro"},
        }))
        .await;
    let (changed, _) = client.recv_until("model_changed").await;
    assert_eq!(changed["payload"]["model"], "stub-pro");
}

#[tokio::test]
async fn get_logs_returns_worker_tail() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let worker = spawn_worker(&mut client, "gemini").await;
    let worker_id = worker["id"].as_str().unwrap().to_string();

    client
        .send(json!({"type": "get_logs", "payload": {"processId": worker_id, "tail": 5}}))
        .await;
    let logs = client.recv().await;
    assert_eq!(logs["type"], "logs");
    assert_eq!(logs["processId"], worker_id);
    assert_eq!(logs["logs"][0], "stub log line");
}

#[tokio::test]
async fn list_models_reflects_worker_hello() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    spawn_worker(&mut client, "gemini").await;
    // The hello lands asynchronously right after spawn.
    tokio::time::sleep(Duration::from_millis(200)).await;

    client.send(json!({"type": "list_models"})).await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "models");
    let models = reply["models"]["gemini"].as_array().unwrap();
    assert!(models.iter().any(|m| m == "stub-pro"));
}

#[tokio::test]
async fn worker_death_reaps_registry_and_port() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let worker = spawn_worker(&mut client, "gemini").await;
    let worker_id = worker["id"].as_str().unwrap().to_string();

    // Kill the worker out from under the gateway.
    let handle = harness.backend.handle(&worker_id).unwrap();
    handle.alive.store(false, Ordering::SeqCst);
    handle.server.abort();

    // The stream close triggers the reap.
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.send(json!({"type": "list_processes"})).await;
    let listing = client.recv().await;
    assert_eq!(listing["processes"].as_array().unwrap().len(), 0);
    assert_eq!(harness.gateway.fleet().ports_in_use(), 0);
}

#[tokio::test]
async fn subscriptions_tear_down_on_unsubscribe_all() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let worker = spawn_worker(&mut client, "gemini").await;
    let worker_id = worker["id"].as_str().unwrap().to_string();

    client
        .send(json!({"type": "subscribe", "payload": {"processId": worker_id}}))
        .await;
    client.recv().await;
    client
        .send(json!({"type": "subscribe", "payload": {"provider": "gemini"}}))
        .await;
    client.recv().await;

    client.send(json!({"type": "list_subscriptions"})).await;
    let subs = client.recv().await;
    assert_eq!(subs["processes"].as_array().unwrap().len(), 1);
    assert_eq!(subs["providers"].as_array().unwrap().len(), 1);

    client
        .send(json!({"type": "unsubscribe", "payload": {"all": true}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "unsubscribed");

    client.send(json!({"type": "list_subscriptions"})).await;
    let subs = client.recv().await;
    assert_eq!(subs["processes"].as_array().unwrap().len(), 0);
    assert_eq!(subs["providers"].as_array().unwrap().len(), 0);
}

// =============================================================================
// Auxiliary HTTP surface
// =============================================================================

#[tokio::test]
async fn http_status_and_processes() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;
    spawn_worker(&mut client, "gemini").await;

    let http = reqwest::Client::new();
    let base = format!("http://{}", harness.addr);

    let health: Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["workers"], 1);

    let processes: Value = http
        .get(format!("{base}/processes?provider=gemini"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(processes["processes"].as_array().unwrap().len(), 1);

    let providers: Value = http
        .get(format!("{base}/providers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entry = &providers["providers"][0];
    assert_eq!(entry["provider"], "gemini");
    assert_eq!(entry["workers"], 1);
}

#[tokio::test]
async fn config_update_with_restart_replaces_workers() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;

    let w1 = spawn_worker(&mut client, "gemini").await;
    let w2 = spawn_worker(&mut client, "gemini").await;
    let mut original: Vec<String> = vec![
        w1["id"].as_str().unwrap().to_string(),
        w2["id"].as_str().unwrap().to_string(),
    ];
    original.sort();

    let http = reqwest::Client::new();
    let response: Value = http
        .post(format!("http://{}/config/gemini", harness.addr))
        .json(&json!({"systemPrompt": "X", "restart": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let mut restarted: Vec<String> = response["restartedContainers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    restarted.sort();
    assert_eq!(restarted, original);

    // The prompt file holds exactly the new content.
    let prompt_path = harness
        .workspace
        .path()
        .join("prompts")
        .join("gemini-system-prompt.md");
    assert_eq!(std::fs::read_to_string(prompt_path).unwrap(), "X");

    // Both workers were re-spawned.
    client
        .send(json!({"type": "list_processes", "payload": {"provider": "gemini"}}))
        .await;
    let listing = client.recv().await;
    assert_eq!(listing["processes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn serve_is_path_traversal_safe() {
    let harness = start_gateway(false).await;

    // A known file inside the workspace, and a secret outside it.
    let workspace = harness.workspace.path().join("ws");
    std::fs::write(workspace.join("known.txt"), "artifact contents").unwrap();
    std::fs::write(harness.workspace.path().join("secret"), "top secret").unwrap();

    let http = reqwest::Client::new();
    let ok = http
        .get(format!("http://{}/serve/known.txt", harness.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.text().await.unwrap(), "artifact contents");

    // reqwest normalizes `..` away, so drive the raw request by hand.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(b"GET /serve/../secret HTTP/1.1\r\nHost: zeus\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(
        response.starts_with("HTTP/1.1 403"),
        "expected 403, got: {}",
        response.lines().next().unwrap_or("")
    );
    assert!(!response.contains("top secret"));
}

#[tokio::test]
async fn shutdown_notifies_clients_and_stops_workers() {
    let harness = start_gateway(false).await;
    let mut client = TestClient::connect(harness.addr).await;
    spawn_worker(&mut client, "gemini").await;

    harness.gateway.shutdown().await;

    let (frame, _) = client.recv_until("shutdown").await;
    assert_eq!(frame["reason"], "gateway stopping");
    assert_eq!(harness.gateway.fleet().registry().len(), 0);
    assert_eq!(harness.gateway.fleet().ports_in_use(), 0);

    // Shutdown is idempotent.
    harness.gateway.shutdown().await;
}
