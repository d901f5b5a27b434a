//! Client hub: the connection table.
//!
//! One entry per connected client stream, holding the client's outbound
//! queue and its in-flight affinity. Every frame to a client goes through
//! the entry's sender; the client's WebSocket task is the single writer
//! draining it, so per-client ordering is preserved by construction.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use zeus_core::{ClientId, WorkerId};

/// Outbound frames queued per client before the socket writer drains them.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

struct ClientEntry {
    sender: mpsc::Sender<String>,
    current_worker: Option<WorkerId>,
}

/// Table of connected clients.
#[derive(Default)]
pub struct ClientHub {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client. Returns its id and the receiving end of its
    /// outbound queue, which the connection's writer task must drain.
    pub fn attach(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id: ClientId = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(
            id.clone(),
            ClientEntry {
                sender,
                current_worker: None,
            },
        );
        debug!(client_id = %id, "client attached");
        (id, receiver)
    }

    /// Drop a client's entry. The caller is responsible for tearing down
    /// the client's Fanout index entries first.
    pub fn detach(&self, client_id: &str) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if clients.remove(client_id).is_some() {
            debug!(client_id, "client detached");
        }
    }

    /// Queue a frame to one client. Returns false if the client is gone.
    pub fn send_to(&self, client_id: &str, frame: &str) -> bool {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        match clients.get(client_id) {
            Some(entry) => match entry.sender.try_send(frame.to_string()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id, "client queue full, dropping frame");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Queue a frame to every connected client.
    pub fn broadcast(&self, frame: &str) {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        for entry in clients.values() {
            let _ = entry.sender.try_send(frame.to_string());
        }
    }

    /// Record or clear the worker currently serving this client's request.
    pub fn set_current_worker(&self, client_id: &str, worker_id: Option<WorkerId>) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = clients.get_mut(client_id) {
            entry.current_worker = worker_id;
        }
    }

    /// The worker currently serving this client, if any.
    pub fn current_worker_of(&self, client_id: &str) -> Option<WorkerId> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.get(client_id)?.current_worker.clone()
    }

    /// Clear a client's affinity only if it still points at `worker_id`.
    pub fn clear_if_current(&self, client_id: &str, worker_id: &str) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = clients.get_mut(client_id) {
            if entry.current_worker.as_deref() == Some(worker_id) {
                entry.current_worker = None;
            }
        }
    }

    /// Clients whose affinity points at a worker.
    pub fn clients_bound_to(&self, worker_id: &str) -> Vec<ClientId> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients
            .iter()
            .filter(|(_, e)| e.current_worker.as_deref() == Some(worker_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Clear every affinity pointing at a dead worker.
    pub fn clear_affinity_to(&self, worker_id: &str) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        for entry in clients.values_mut() {
            if entry.current_worker.as_deref() == Some(worker_id) {
                entry.current_worker = None;
            }
        }
    }

    /// Connected client count.
    pub fn len(&self) -> usize {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
