//! Shared type definitions used across the Zeus crates.
//!
//! This module provides the data model of the control plane: workers,
//! clients, providers, and the lifecycle events the registry emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a worker (`zeus-<provider>-<port>`).
pub type WorkerId = String;

/// Short opaque identifier for a connected client.
pub type ClientId = String;

/// Opaque provider tag (e.g. `gemini`, `claude`, `copilot`). Open set.
pub type Provider = String;

/// Build the canonical worker id for a provider/port pair.
pub fn worker_id_for(provider: &str, port: u16) -> WorkerId {
    format!("zeus-{provider}-{port}")
}

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Worker process launched, waiting for readiness
    #[default]
    Starting,
    /// Worker is ready and serving
    Running,
    /// Worker process is alive but its endpoint is failing
    Degraded,
    /// Worker was stopped (gracefully or because its process exited)
    Stopped,
    /// Worker failed terminally (spawn timeout, crash)
    Failed,
}

impl WorkerStatus {
    /// Returns true if this status means the worker is gone for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Last known health of a worker, as observed by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Not probed yet
    #[default]
    Unknown,
    /// Process alive and endpoint responding
    Healthy,
    /// Process dead or endpoint failing
    Unhealthy,
}

impl HealthState {
    /// Returns true if the worker is eligible for selection.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Snapshot of one worker's record in the registry.
///
/// `WorkerInfo` is cheap to clone; readers always get a consistent snapshot
/// of a single worker, never a torn record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    /// Stable id, unique while the worker lives (`zeus-<provider>-<port>`)
    pub id: WorkerId,
    /// Provider tag this worker wraps
    pub provider: Provider,
    /// Host port exclusively owned by this worker
    pub port: u16,
    /// Lifecycle status
    pub status: WorkerStatus,
    /// Last probed health
    pub health: HealthState,
    /// Display name, reported by the worker's stream hello (defaults to id)
    pub name: String,
    /// Model last reported by the worker, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Models the worker advertised in its hello
    #[serde(default)]
    pub available_models: Vec<String>,
    /// When the worker record was created
    pub created_at: DateTime<Utc>,
}

impl WorkerInfo {
    /// Create a new record for a freshly launched worker.
    pub fn new(provider: impl Into<Provider>, port: u16) -> Self {
        let provider = provider.into();
        let id = worker_id_for(&provider, port);
        Self {
            name: id.clone(),
            id,
            provider,
            port,
            status: WorkerStatus::Starting,
            health: HealthState::Unknown,
            model: None,
            available_models: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Returns true if this worker may appear in a provider pool.
    pub fn is_selectable(&self) -> bool {
        !self.status.is_terminal() && self.health.is_healthy()
    }
}

/// Lifecycle event emitted by the registry.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Worker reached `running`/`healthy` after spawn
    Started(WorkerInfo),
    /// Worker was stopped or its process exited
    Stopped(WorkerInfo),
    /// Worker transitioned from healthy to unhealthy, or failed terminally
    Failed(WorkerInfo),
}

impl LifecycleEvent {
    /// The worker record the event refers to.
    pub fn worker(&self) -> &WorkerInfo {
        match self {
            Self::Started(w) | Self::Stopped(w) | Self::Failed(w) => w,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_format() {
        assert_eq!(worker_id_for("gemini", 4003), "zeus-gemini-4003");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!WorkerStatus::Starting.is_terminal());
        assert!(!WorkerStatus::Running.is_terminal());
        assert!(!WorkerStatus::Degraded.is_terminal());
        assert!(WorkerStatus::Stopped.is_terminal());
        assert!(WorkerStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_worker_defaults() {
        let w = WorkerInfo::new("claude", 4010);
        assert_eq!(w.id, "zeus-claude-4010");
        assert_eq!(w.name, w.id);
        assert_eq!(w.status, WorkerStatus::Starting);
        assert_eq!(w.health, HealthState::Unknown);
        assert!(!w.is_selectable());
    }

    #[test]
    fn test_selectable() {
        let mut w = WorkerInfo::new("gemini", 4000);
        w.status = WorkerStatus::Running;
        w.health = HealthState::Healthy;
        assert!(w.is_selectable());

        w.health = HealthState::Unhealthy;
        assert!(!w.is_selectable());

        w.health = HealthState::Healthy;
        w.status = WorkerStatus::Stopped;
        assert!(!w.is_selectable());
    }

    #[test]
    fn test_worker_info_wire_shape() {
        let w = WorkerInfo::new("gemini", 4000);
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["id"], "zeus-gemini-4000");
        assert!(v.get("availableModels").is_some());
        assert!(v.get("createdAt").is_some());
        // model is None and omitted
        assert!(v.get("model").is_none());
    }
}
