//! Gateway → client event frames, and the worker contract shapes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use zeus_core::{WorkerInfo, ZeusError};

/// Per-provider summary used by `list_providers` and status snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub provider: String,
    /// Live (non-terminal) worker count
    pub workers: usize,
    /// Healthy worker count
    pub healthy: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub auto_spawn: bool,
}

/// Gateway + fleet snapshot returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub clients: usize,
    pub workers: Vec<WorkerInfo>,
    pub providers: Vec<ProviderSummary>,
}

/// One gateway → client frame.
///
/// Worker events relayed to the originating (affinity) client are passed
/// through as-is via [`GatewayEvent::Passthrough`]; subscription delivery
/// wraps them via [`GatewayEvent::stream`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        session_id: String,
        client_id: String,
        providers: Vec<String>,
    },
    Pong {
        timestamp: i64,
    },
    Status {
        status: StatusSnapshot,
    },
    Processes {
        processes: Vec<WorkerInfo>,
    },
    Providers {
        providers: Vec<ProviderSummary>,
    },
    Models {
        models: BTreeMap<String, Vec<String>>,
    },
    Spawning {
        provider: String,
    },
    Spawned {
        worker: WorkerInfo,
    },
    #[serde(rename_all = "camelCase")]
    Stopped {
        #[serde(skip_serializing_if = "Option::is_none")]
        process_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        count: usize,
    },
    Scaled {
        provider: String,
        previous: usize,
        current: usize,
    },
    #[serde(rename_all = "camelCase")]
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        process_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        process_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        all: bool,
    },
    Subscriptions {
        processes: Vec<String>,
        providers: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Logs {
        process_id: String,
        logs: Vec<String>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<Value>,
    },
    Shutdown {
        reason: String,
    },
}

impl GatewayEvent {
    /// `pong` with the local timestamp.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// `error{message}` with no hint.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            hint: None,
        }
    }

    /// `error{message, hint}` built from a gateway error, attaching the
    /// short string hint when one exists.
    pub fn from_error(err: &ZeusError) -> Self {
        Self::Error {
            message: err.to_string(),
            hint: err.hint().map(|h| Value::String(h.to_string())),
        }
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"failed to encode frame: {e}"}}"#)
        })
    }

    /// Build the wrapped subscription-delivery frame for a worker event.
    pub fn stream(
        source: StreamSource,
        event: &str,
        payload: &Value,
        provider: &str,
        process_id: &str,
        process_name: &str,
    ) -> Value {
        serde_json::json!({
            "type": "stream",
            "source": source.as_str(),
            "event": event,
            "payload": payload,
            "provider": provider,
            "processId": process_id,
            "processName": process_name,
        })
    }
}

/// Which subscription matched a wrapped delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    /// A per-worker subscription
    Process,
    /// A per-provider subscription
    Provider,
}

impl StreamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Provider => "provider",
        }
    }
}

// =============================================================================
// Worker contract (the collaborator boundary)
// =============================================================================

/// Worker event types that terminate a chat request and clear affinity.
pub const TERMINAL_EVENTS: [&str; 2] = ["done", "error"];

/// Returns true for worker event types that end a request.
pub fn is_terminal_event(event_type: &str) -> bool {
    TERMINAL_EVENTS.contains(&event_type)
}

/// Response shape of a worker's `/health` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerHealthReply {
    pub status: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub uptime: f64,
}

impl WorkerHealthReply {
    /// Whether the worker counts as healthy for probing purposes.
    pub fn is_ok(&self) -> bool {
        self.status == "ok" && self.ready
    }
}

/// Response shape of a worker's `/status` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusReply {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// First frame a worker emits on stream accept.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHello {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub authenticated: bool,
}
