//! The client command set, as a tagged sum.
//!
//! The router pattern-matches on [`ClientCommand`] instead of dispatching on
//! raw strings. The orchestration-forward family is one variant carrying its
//! [`ForwardKind`]; the original envelope is kept by the caller so forwards
//! stay verbatim.

use serde_json::Value;

use crate::envelope::Envelope;
use zeus_core::{Result, ZeusError};

/// Commands the gateway routes verbatim to a selected worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    NewSession,
    SetSession,
    GetSession,
    SetSystemPrompt,
    SetAppendSystemPrompt,
    GetSystemPrompt,
    SetAllowedTools,
    GetAllowedTools,
    GetAgentState,
}

impl ForwardKind {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewSession => "new_session",
            Self::SetSession => "set_session",
            Self::GetSession => "get_session",
            Self::SetSystemPrompt => "set_system_prompt",
            Self::SetAppendSystemPrompt => "set_append_system_prompt",
            Self::GetSystemPrompt => "get_system_prompt",
            Self::SetAllowedTools => "set_allowed_tools",
            Self::GetAllowedTools => "get_allowed_tools",
            Self::GetAgentState => "get_agent_state",
        }
    }

    /// Parse a wire name, if it names a forwarded command.
    pub fn from_str(kind: &str) -> Option<Self> {
        Some(match kind {
            "new_session" => Self::NewSession,
            "set_session" => Self::SetSession,
            "get_session" => Self::GetSession,
            "set_system_prompt" => Self::SetSystemPrompt,
            "set_append_system_prompt" => Self::SetAppendSystemPrompt,
            "get_system_prompt" => Self::GetSystemPrompt,
            "set_allowed_tools" => Self::SetAllowedTools,
            "get_allowed_tools" => Self::GetAllowedTools,
            "get_agent_state" => Self::GetAgentState,
            _ => return None,
        })
    }
}

/// One parsed client command.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Ping,
    Status,
    ListProcesses {
        provider: Option<String>,
    },
    ListProviders,
    ListModels {
        provider: Option<String>,
    },
    ListSubscriptions,
    Spawn {
        provider: String,
        model: Option<String>,
        port: Option<u16>,
    },
    /// Stop one worker (`process_id`) or a whole provider's workers.
    Stop {
        process_id: Option<String>,
        provider: Option<String>,
    },
    Scale {
        provider: String,
        count: usize,
    },
    /// Chat request; the full envelope is forwarded to the selected worker.
    Chat {
        provider: String,
    },
    Subscribe {
        process_id: Option<String>,
        provider: Option<String>,
    },
    Unsubscribe {
        process_id: Option<String>,
        provider: Option<String>,
        all: bool,
    },
    SetModel {
        process_id: String,
        model: String,
    },
    GetLogs {
        process_id: String,
        tail: Option<usize>,
    },
    /// Orchestration forward: routed verbatim to a worker selected by
    /// explicit `processId` or by provider.
    Forward {
        kind: ForwardKind,
        process_id: Option<String>,
        provider: Option<String>,
    },
}

impl ClientCommand {
    /// Parse a normalized envelope into a command.
    ///
    /// Missing required fields and unknown command types are input errors
    /// per the gateway's error taxonomy.
    pub fn from_envelope(env: &Envelope) -> Result<Self> {
        let opt = |key: &str| env.get_str(key).map(str::to_string);

        let cmd = match env.kind.as_str() {
            "ping" => Self::Ping,
            "status" => Self::Status,
            "list_processes" => Self::ListProcesses {
                provider: opt("provider"),
            },
            "list_providers" => Self::ListProviders,
            "list_models" => Self::ListModels {
                provider: opt("provider"),
            },
            "list_subscriptions" => Self::ListSubscriptions,
            "spawn" => Self::Spawn {
                provider: env.require_str("provider")?.to_string(),
                model: opt("model"),
                port: parse_port(env)?,
            },
            "stop" => {
                let process_id = opt("processId");
                let provider = opt("provider");
                if process_id.is_none() && provider.is_none() {
                    return Err(ZeusError::missing_field("processId or provider"));
                }
                Self::Stop {
                    process_id,
                    provider,
                }
            }
            "scale" => Self::Scale {
                provider: env.require_str("provider")?.to_string(),
                count: env
                    .get_u64("count")
                    .ok_or_else(|| ZeusError::missing_field("count"))?
                    as usize,
            },
            "chat" => Self::Chat {
                provider: env.require_str("provider")?.to_string(),
            },
            "subscribe" => {
                let process_id = opt("processId");
                let provider = opt("provider");
                if process_id.is_none() && provider.is_none() {
                    return Err(ZeusError::missing_field("processId or provider"));
                }
                Self::Subscribe {
                    process_id,
                    provider,
                }
            }
            "unsubscribe" => Self::Unsubscribe {
                process_id: opt("processId"),
                provider: opt("provider"),
                all: env.get_bool("all").unwrap_or(false),
            },
            "set_model" => Self::SetModel {
                process_id: env.require_str("processId")?.to_string(),
                model: env.require_str("model")?.to_string(),
            },
            "get_logs" => Self::GetLogs {
                process_id: env.require_str("processId")?.to_string(),
                tail: env.get_u64("tail").map(|t| t as usize),
            },
            other => match ForwardKind::from_str(other) {
                Some(kind) => Self::Forward {
                    kind,
                    process_id: opt("processId"),
                    provider: opt("provider"),
                },
                None => {
                    return Err(ZeusError::UnknownCommand {
                        command: other.to_string(),
                    })
                }
            },
        };

        Ok(cmd)
    }
}

/// A `port` field must be a JSON integer that fits a `u16`. Anything else
/// (negative, fractional, oversized) is an input error, never coerced.
fn parse_port(env: &Envelope) -> Result<Option<u16>> {
    match env.payload.get("port") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64().and_then(|p| u16::try_from(p).ok()) {
            Some(port) => Ok(Some(port)),
            None => Err(ZeusError::malformed(format!("invalid port: {value}"))),
        },
    }
}
