//! Gateway configuration.
//!
//! Static configuration for the gateway process: listen address, the worker
//! port range, directories shared with workers, probe cadence, and the
//! built-in provider table. Per-provider *runtime* policy (system prompts)
//! lives in the gateway's `ConfigStore`, seeded from [`ProviderDefaults`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default client-facing port.
pub const DEFAULT_CLIENT_PORT: u16 = 3001;

/// Default worker port range, half-open.
pub const DEFAULT_PORT_RANGE_LOW: u16 = 4000;
/// Upper bound (exclusive) of the default worker port range.
pub const DEFAULT_PORT_RANGE_HIGH: u16 = 4100;

/// Default health check interval in seconds.
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Default per-probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default deadline for a spawned worker to become ready, in seconds.
pub const DEFAULT_READY_DEADLINE_SECS: u64 = 60;

/// Maximum backoff between readiness polls, in milliseconds.
pub const MAX_READY_BACKOFF_MS: u64 = 2_000;

/// Default grace window before a stop escalates to a kill, in seconds.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 10;

/// Naming prefix for all worker OS artifacts (container names, sessions).
pub const WORKER_NAME_PREFIX: &str = "zeus-";

/// How workers are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Docker containers with port mapping and bind mounts
    #[default]
    Container,
    /// Plain subprocesses (no image build, no bind mounts)
    Subprocess,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Subprocess => write!(f, "subprocess"),
        }
    }
}

/// Static per-provider defaults, seeding the runtime `ConfigStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefaults {
    /// Model used when a spawn doesn't name one
    pub default_model: Option<String>,
    /// Port the worker listens on inside its container/process
    pub default_inner_port: u16,
    /// Environment variable names the worker expects (values come from
    /// the gateway's own environment; credentials are out of scope here)
    #[serde(default)]
    pub env_keys: Vec<String>,
    /// Initial system prompt (may be empty)
    #[serde(default)]
    pub system_prompt: String,
    /// Whether `chat` may spawn a worker when the pool is empty
    #[serde(default)]
    pub auto_spawn: bool,
    /// Container image for the container backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Launcher command for the subprocess backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<PathBuf>,
}

impl ProviderDefaults {
    fn builtin(
        default_model: &str,
        default_inner_port: u16,
        env_keys: &[&str],
        image: &str,
    ) -> Self {
        Self {
            default_model: Some(default_model.to_string()),
            default_inner_port,
            env_keys: env_keys.iter().map(|k| k.to_string()).collect(),
            system_prompt: String::new(),
            auto_spawn: true,
            image: Some(image.to_string()),
            command: None,
        }
    }
}

/// Built-in provider table. The provider set is open: unknown tags can be
/// added to the config file, these are just the ones shipped by default.
pub fn builtin_providers() -> HashMap<String, ProviderDefaults> {
    let mut providers = HashMap::new();
    providers.insert(
        "gemini".to_string(),
        ProviderDefaults::builtin("gemini-2.5-pro", 8601, &["GEMINI_API_KEY"], "zeus-worker-gemini:latest"),
    );
    providers.insert(
        "claude".to_string(),
        ProviderDefaults::builtin(
            "claude-sonnet-4-5",
            8602,
            &["ANTHROPIC_API_KEY"],
            "zeus-worker-claude:latest",
        ),
    );
    providers.insert(
        "copilot".to_string(),
        ProviderDefaults::builtin("gpt-4o", 8603, &["GITHUB_TOKEN"], "zeus-worker-copilot:latest"),
    );
    providers
}

/// Gateway process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind the client-facing listener to
    pub host: String,
    /// Client-facing port (WebSocket + auxiliary HTTP)
    pub port: u16,
    /// Lower bound of the worker port range (inclusive)
    pub port_range_low: u16,
    /// Upper bound of the worker port range (exclusive)
    pub port_range_high: u16,
    /// Workspace root shared with workers (bind-mounted read/write)
    pub workspace: PathBuf,
    /// Shared prompts directory (bind-mounted read-only into workers)
    pub prompts_dir: PathBuf,
    /// Worker launch backend
    pub backend: BackendKind,
    /// Health check interval in seconds
    pub health_interval_secs: u64,
    /// Per-probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// Spawn readiness deadline in seconds
    pub ready_deadline_secs: u64,
    /// Stop grace window before a forceful kill, in seconds
    pub stop_grace_secs: u64,
    /// Enable debug env for launched workers
    pub debug: bool,
    /// Provider table
    pub providers: HashMap<String, ProviderDefaults>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let base = home.join(".zeus");
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_CLIENT_PORT,
            port_range_low: DEFAULT_PORT_RANGE_LOW,
            port_range_high: DEFAULT_PORT_RANGE_HIGH,
            workspace: base.join("workspace"),
            prompts_dir: base.join("prompts"),
            backend: BackendKind::default(),
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            ready_deadline_secs: DEFAULT_READY_DEADLINE_SECS,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
            debug: false,
            providers: builtin_providers(),
        }
    }
}

impl GatewayConfig {
    /// Validate range and directory settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.port_range_low >= self.port_range_high {
            return Err(crate::ZeusError::ConfigValidation {
                message: format!(
                    "port range [{}, {}) is empty",
                    self.port_range_low, self.port_range_high
                ),
            });
        }
        if self.providers.is_empty() {
            return Err(crate::ZeusError::ConfigValidation {
                message: "no providers configured".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `chat` may auto-spawn for this provider.
    pub fn auto_spawn_allowed(&self, provider: &str) -> bool {
        self.providers
            .get(provider)
            .map(|p| p.auto_spawn)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.port_range_low, 4000);
        assert_eq!(config.port_range_high, 4100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builtin_provider_table() {
        let providers = builtin_providers();
        assert!(providers.contains_key("gemini"));
        assert!(providers.contains_key("claude"));
        assert!(providers.contains_key("copilot"));
        let gemini = &providers["gemini"];
        assert!(gemini.auto_spawn);
        assert!(gemini.image.is_some());
    }

    #[test]
    fn test_invalid_port_range() {
        let config = GatewayConfig {
            port_range_low: 5000,
            port_range_high: 5000,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auto_spawn_unknown_provider() {
        let config = GatewayConfig::default();
        assert!(config.auto_spawn_allowed("gemini"));
        assert!(!config.auto_spawn_allowed("nonexistent"));
    }
}
