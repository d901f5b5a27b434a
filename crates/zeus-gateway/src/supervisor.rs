//! Worker supervisor: owns exactly one worker across its whole lifetime.
//!
//! The supervisor launches nothing itself (the fleet hands it a launched
//! [`WorkerProcess`]), but from then on it is the only component that talks
//! to the worker: it polls readiness, holds the persistent bidirectional
//! stream, writes outbound envelopes, and runs the graceful-then-forceful
//! stop sequence. Worker events read off the stream are tagged and pushed
//! into the gateway's fanout channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::fanout::WorkerEvent;
use crate::launch::WorkerProcess;
use crate::registry::WorkerRegistry;
use zeus_core::config::MAX_READY_BACKOFF_MS;
use zeus_core::{Provider, Result, WorkerId, ZeusError};
use zeus_proto::{Envelope, WorkerHealthReply, WorkerStatusReply};

/// Attempts to establish the worker stream before giving up.
const STREAM_CONNECT_ATTEMPTS: u32 = 3;

/// Poll cadence while waiting for a stopping worker to exit.
const STOP_POLL_MS: u64 = 250;

/// Owner of one worker process and its stream.
pub struct WorkerSupervisor {
    pub worker_id: WorkerId,
    pub provider: Provider,
    pub port: u16,
    process: Box<dyn WorkerProcess>,
    outbound: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    stopping: AtomicBool,
    stop_grace: Duration,
}

impl WorkerSupervisor {
    pub fn new(
        worker_id: WorkerId,
        provider: Provider,
        port: u16,
        process: Box<dyn WorkerProcess>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            worker_id,
            provider,
            port,
            process,
            outbound: StdMutex::new(None),
            stopping: AtomicBool::new(false),
            stop_grace,
        }
    }

    /// Poll the worker's health endpoint until it reports ready or the
    /// deadline fires. On success, fetch `/status` for the first reported
    /// model. Backoff stays small (≤2 s) but bounded by the deadline.
    pub async fn wait_ready(
        &self,
        http: &reqwest::Client,
        probe_timeout: Duration,
        deadline: Duration,
    ) -> Result<WorkerStatusReply> {
        let start = Instant::now();
        let health_url = format!("http://127.0.0.1:{}/health", self.port);
        let mut backoff = Duration::from_millis(250);

        loop {
            if start.elapsed() >= deadline {
                return Err(ZeusError::WorkerReadyTimeout {
                    worker_id: self.worker_id.clone(),
                    deadline_secs: deadline.as_secs(),
                });
            }
            if !self.process.is_alive().await {
                return Err(ZeusError::launch(
                    &self.worker_id,
                    "worker exited during startup",
                ));
            }

            match http
                .get(&health_url)
                .timeout(probe_timeout)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    match response.json::<WorkerHealthReply>().await {
                        Ok(reply) if reply.is_ok() => {
                            debug!(worker_id = %self.worker_id, uptime = reply.uptime, "worker ready");
                            return Ok(self.fetch_status(http, probe_timeout).await);
                        }
                        Ok(_) => debug!(worker_id = %self.worker_id, "worker up but not ready"),
                        Err(e) => debug!(worker_id = %self.worker_id, error = %e, "bad health reply"),
                    }
                }
                Ok(response) => {
                    debug!(worker_id = %self.worker_id, status = %response.status(), "health probe rejected")
                }
                Err(e) => debug!(worker_id = %self.worker_id, error = %e, "health probe failed"),
            }

            sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_millis(MAX_READY_BACKOFF_MS));
        }
    }

    async fn fetch_status(&self, http: &reqwest::Client, probe_timeout: Duration) -> WorkerStatusReply {
        let url = format!("http://127.0.0.1:{}/status", self.port);
        match http.get(&url).timeout(probe_timeout).send().await {
            Ok(response) => response.json().await.unwrap_or(WorkerStatusReply {
                model: None,
                available_models: Vec::new(),
                session_id: None,
            }),
            Err(_) => WorkerStatusReply {
                model: None,
                available_models: Vec::new(),
                session_id: None,
            },
        }
    }

    /// Open the persistent bidirectional stream to the worker and hold it
    /// for the worker's lifetime. Events read off the stream are tagged and
    /// forwarded into `events_tx`; a close without a pending stop reports
    /// the worker id on `on_close`.
    pub async fn connect(
        self: &Arc<Self>,
        registry: Arc<WorkerRegistry>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        on_close: mpsc::UnboundedSender<WorkerId>,
    ) -> Result<()> {
        let url = format!("ws://127.0.0.1:{}/ws", self.port);

        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match tokio_tungstenite::connect_async(&url).await {
                Ok((stream, _response)) => break stream,
                Err(e) if attempt < STREAM_CONNECT_ATTEMPTS => {
                    debug!(worker_id = %self.worker_id, attempt, error = %e, "stream connect retry");
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    return Err(ZeusError::StreamConnect {
                        worker_id: self.worker_id.clone(),
                        message: e.to_string(),
                    })
                }
            }
        };

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        {
            let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            *outbound = Some(tx);
        }

        // Writer: drain the outbound queue onto the socket.
        let writer_id = self.worker_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                    warn!(worker_id = %writer_id, error = %e, "worker stream write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: tag each event and push it to the fanout channel.
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut worker_name = supervisor.worker_id.clone();
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let envelope = match Envelope::parse(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(worker_id = %supervisor.worker_id, error = %e, "unparseable worker frame");
                        continue;
                    }
                };
                if envelope.kind == "connected" {
                    if let Ok(hello) =
                        serde_json::from_value(serde_json::Value::Object(envelope.payload.clone()))
                    {
                        registry.record_hello(&supervisor.worker_id, &hello);
                        if let Some(info) = registry.get(&supervisor.worker_id) {
                            worker_name = info.name;
                        }
                    }
                }
                let event = WorkerEvent {
                    worker_id: supervisor.worker_id.clone(),
                    provider: supervisor.provider.clone(),
                    worker_name: worker_name.clone(),
                    event_type: envelope.kind.clone(),
                    raw: text,
                    payload: serde_json::Value::Object(envelope.payload),
                };
                if events_tx.send(event).is_err() {
                    break;
                }
            }

            // Stream gone. Unless a stop is already in progress, the worker
            // died underneath us.
            {
                let mut outbound = supervisor
                    .outbound
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                *outbound = None;
            }
            if !supervisor.stopping.load(Ordering::SeqCst) {
                info!(worker_id = %supervisor.worker_id, "worker stream closed unexpectedly");
                let _ = on_close.send(supervisor.worker_id.clone());
            }
        });

        info!(worker_id = %self.worker_id, port = self.port, "worker stream connected");
        Ok(())
    }

    /// Write a framed envelope on the outbound stream.
    pub fn send(&self, frame: String) -> Result<()> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) if tx.send(frame).is_ok() => Ok(()),
            _ => Err(ZeusError::StreamNotConnected {
                worker_id: self.worker_id.clone(),
            }),
        }
    }

    /// Whether a stop sequence has begun.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Graceful-then-forceful stop. Idempotent: a second call finds the
    /// stopping flag set and the process already gone.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        // Close the outbound stream first so no further sends race the stop.
        {
            let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            *outbound = None;
        }

        if self.process.is_alive().await {
            if let Err(e) = self.process.terminate().await {
                warn!(worker_id = %self.worker_id, error = %e, "graceful terminate failed");
            }
            let deadline = Instant::now() + self.stop_grace;
            while self.process.is_alive().await {
                if Instant::now() >= deadline {
                    warn!(worker_id = %self.worker_id, "grace window expired, killing worker");
                    if let Err(e) = self.process.kill().await {
                        warn!(worker_id = %self.worker_id, error = %e, "kill failed");
                    }
                    break;
                }
                sleep(Duration::from_millis(STOP_POLL_MS)).await;
            }
        }

        if let Err(e) = self.process.cleanup().await {
            warn!(worker_id = %self.worker_id, error = %e, "worker cleanup failed");
        }
        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// OS-level liveness of the owned process.
    pub async fn is_alive(&self) -> bool {
        self.process.is_alive().await
    }

    /// Tail of the worker's log stream.
    pub async fn logs(&self, tail: usize) -> Result<Vec<String>> {
        self.process.logs(tail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeProcess {
        alive: AtomicBool,
    }

    impl FakeProcess {
        fn new(alive: bool) -> Self {
            Self {
                alive: AtomicBool::new(alive),
            }
        }
    }

    #[async_trait]
    impl WorkerProcess for FakeProcess {
        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn terminate(&self) -> Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn kill(&self) -> Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
        async fn logs(&self, _tail: usize) -> Result<Vec<String>> {
            Ok(vec!["log line".into()])
        }
    }

    fn supervisor(process: FakeProcess) -> WorkerSupervisor {
        WorkerSupervisor::new(
            "zeus-gemini-4000".into(),
            "gemini".into(),
            4000,
            Box::new(process),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_send_without_stream_fails() {
        let sup = supervisor(FakeProcess::new(true));
        let err = sup.send("{}".into()).unwrap_err();
        assert!(matches!(err, ZeusError::StreamNotConnected { .. }));
    }

    #[tokio::test]
    async fn test_stop_terminates_gracefully() {
        let sup = supervisor(FakeProcess::new(true));
        sup.stop().await;
        assert!(sup.is_stopping());
        assert!(!sup.is_alive().await);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let sup = supervisor(FakeProcess::new(true));
        sup.stop().await;
        sup.stop().await;
        assert!(sup.is_stopping());
    }

    #[tokio::test]
    async fn test_wait_ready_fails_fast_when_process_dies() {
        let sup = supervisor(FakeProcess::new(false));
        let http = reqwest::Client::new();
        let err = sup
            .wait_ready(&http, Duration::from_millis(200), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }
}
